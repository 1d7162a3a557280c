// Conversions between matrix kinds
//
// A matrix already of the requested kind is returned as is. Converting a
// boxed matrix (or a proper list, which gives a row vector) requires every
// element to be of the target kind. Complex matrices become real or int
// matrices with twice the columns, holding (re, im) pairs side by side.

use super::{Elem, KindBuffer, Matrix, MatrixKind};
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::term::TermRef;
use num_complex::Complex64;

impl Interpreter {
    pub fn matrix_to_real(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        self.convert(x, MatrixKind::Real)
    }

    pub fn matrix_to_int(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        self.convert(x, MatrixKind::Int)
    }

    pub fn matrix_to_complex(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        self.convert(x, MatrixKind::Complex)
    }

    pub fn matrix_to_boxed(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        self.convert(x, MatrixKind::Boxed)
    }

    fn convert(&mut self, x: TermRef, kind: MatrixKind) -> Result<TermRef, RuntimeError> {
        let (rows, cols, elems) = match self.matrix(x) {
            Some(m) if m.kind() == kind => return Ok(x),
            Some(m) => (m.rows(), m.cols(), m.elems()),
            None => {
                let xs = self.list_elems(x).ok_or(RuntimeError::NotAMatrix)?;
                let elems: Vec<Elem> = xs.iter().map(|&t| Elem::Term(t)).collect();
                (1, elems.len(), elems)
            }
        };

        let mut out = KindBuffer::with_kind(kind, 2 * elems.len());
        let mut width = cols;
        for e in elems {
            let (e, unboxed) = match e {
                // Boxed elements must already have the target kind
                Elem::Term(t) if kind != MatrixKind::Boxed => (self.term_elem(t), true),
                e => (e, false),
            };
            match (e, kind) {
                (Elem::Complex(z), MatrixKind::Real) if !unboxed => {
                    width = 2 * cols;
                    out.push_elem(self, Elem::Real(z.re));
                    out.push_elem(self, Elem::Real(z.im));
                }
                (Elem::Complex(z), MatrixKind::Int) if !unboxed => {
                    width = 2 * cols;
                    out.push_elem(self, Elem::Int(z.re as i32));
                    out.push_elem(self, Elem::Int(z.im as i32));
                }
                (Elem::Real(d), MatrixKind::Int) if !unboxed => {
                    out.push_elem(self, Elem::Int(d as i32))
                }
                (e, MatrixKind::Boxed) => out.push_elem(self, e),
                (e, _) if e.kind() <= kind && e.kind() != MatrixKind::Boxed => {
                    out.push_elem(self, e)
                }
                (e, _) => {
                    out.discard(self);
                    return Err(RuntimeError::KindMismatch {
                        expected: kind.name(),
                        found: e.kind().name(),
                    });
                }
            }
        }
        Ok(out.finish(self, rows, width))
    }

    /// Real parts. Real and int matrices are their own real part.
    pub fn matrix_re(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        match m.kind() {
            MatrixKind::Complex => Ok(self.complex_parts(&m, |z| z.re)),
            MatrixKind::Real | MatrixKind::Int => Ok(x),
            MatrixKind::Boxed => Err(numeric_expected()),
        }
    }

    /// Imaginary parts; zeros for real and int matrices.
    pub fn matrix_im(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        match m.kind() {
            MatrixKind::Complex => Ok(self.complex_parts(&m, |z| z.im)),
            MatrixKind::Real | MatrixKind::Int => Ok(self.matrix_new(m.kind(), m.rows(), m.cols())),
            MatrixKind::Boxed => Err(numeric_expected()),
        }
    }

    pub fn matrix_conj(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        match m.kind() {
            MatrixKind::Complex => {
                let zs: Vec<Complex64> = m
                    .elems()
                    .into_iter()
                    .filter_map(|e| match e {
                        Elem::Complex(z) => Some(z.conj()),
                        _ => None,
                    })
                    .collect();
                Ok(self.alloc_matrix(Matrix::from_vec(m.rows(), m.cols(), zs)))
            }
            MatrixKind::Real | MatrixKind::Int => Ok(x),
            MatrixKind::Boxed => Err(numeric_expected()),
        }
    }

    fn complex_parts(&mut self, m: &Matrix, part: impl Fn(Complex64) -> f64) -> TermRef {
        let ds: Vec<f64> = m
            .elems()
            .into_iter()
            .filter_map(|e| match e {
                Elem::Complex(z) => Some(part(z)),
                _ => None,
            })
            .collect();
        self.alloc_matrix(Matrix::from_vec(m.rows(), m.cols(), ds))
    }
}

fn numeric_expected() -> RuntimeError {
    RuntimeError::KindMismatch {
        expected: "numeric",
        found: MatrixKind::Boxed.name(),
    }
}
