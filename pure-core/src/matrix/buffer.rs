// Output buffer for matrix-producing operations
//
// The element kind of the result is usually not known up front: it is
// guessed from the first value and kept as long as later values agree. On
// the first disagreement everything collected so far is boxed and the
// buffer continues as a boxed buffer, so no value is computed twice.
//
// A boxed buffer owns one reference to each of its terms. Those references
// pass to the matrix block on `finish`; `discard` drops them.

use super::{Elem, Matrix, MatrixKind};
use crate::interpreter::Interpreter;
use crate::term::TermRef;
use num_complex::Complex64;

#[derive(Debug)]
pub(crate) enum KindBuffer {
    // No value seen yet; holds the capacity to reserve.
    Undecided(usize),
    Int(Vec<i32>),
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
    Boxed(Vec<TermRef>),
}

impl KindBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        KindBuffer::Undecided(capacity)
    }

    pub(crate) fn with_kind(kind: MatrixKind, capacity: usize) -> Self {
        match kind {
            MatrixKind::Int => KindBuffer::Int(Vec::with_capacity(capacity)),
            MatrixKind::Real => KindBuffer::Real(Vec::with_capacity(capacity)),
            MatrixKind::Complex => KindBuffer::Complex(Vec::with_capacity(capacity)),
            MatrixKind::Boxed => KindBuffer::Boxed(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            KindBuffer::Undecided(_) => 0,
            KindBuffer::Int(v) => v.len(),
            KindBuffer::Real(v) => v.len(),
            KindBuffer::Complex(v) => v.len(),
            KindBuffer::Boxed(v) => v.len(),
        }
    }

    pub(crate) fn kind(&self) -> Option<MatrixKind> {
        match self {
            KindBuffer::Undecided(_) => None,
            KindBuffer::Int(_) => Some(MatrixKind::Int),
            KindBuffer::Real(_) => Some(MatrixKind::Real),
            KindBuffer::Complex(_) => Some(MatrixKind::Complex),
            KindBuffer::Boxed(_) => Some(MatrixKind::Boxed),
        }
    }

    fn decide(&mut self, kind: MatrixKind) {
        if let KindBuffer::Undecided(capacity) = *self {
            *self = KindBuffer::with_kind(kind, capacity);
        }
    }

    /// Appends a computed value. A numeric value of exactly the buffer's
    /// kind is stored unboxed and the term is collected if nothing else
    /// owns it; anything else switches the buffer to boxed.
    pub(crate) fn push_term(&mut self, interp: &mut Interpreter, t: TermRef) {
        let e = interp.term_elem(t);
        self.decide(e.kind());
        let stored = match (&mut *self, e) {
            (KindBuffer::Int(v), Elem::Int(n)) => {
                v.push(n);
                true
            }
            (KindBuffer::Real(v), Elem::Real(d)) => {
                v.push(d);
                true
            }
            (KindBuffer::Complex(v), Elem::Complex(z)) => {
                v.push(z);
                true
            }
            _ => false,
        };
        if stored {
            interp.freenew(t);
            return;
        }
        self.to_boxed(interp);
        if let KindBuffer::Boxed(v) = self {
            v.push(interp.new(t));
        }
    }

    /// Appends an element read from another matrix, promoting numeric
    /// elements to the buffer's kind where that is exact.
    pub(crate) fn push_elem(&mut self, interp: &mut Interpreter, e: Elem) {
        self.decide(e.kind());
        let target = self.kind().unwrap_or(MatrixKind::Boxed);
        let stored = match (&mut *self, e.promote(target)) {
            (KindBuffer::Int(v), Some(Elem::Int(n))) => {
                v.push(n);
                true
            }
            (KindBuffer::Real(v), Some(Elem::Real(d))) => {
                v.push(d);
                true
            }
            (KindBuffer::Complex(v), Some(Elem::Complex(z))) => {
                v.push(z);
                true
            }
            (KindBuffer::Boxed(v), Some(Elem::Term(t))) => {
                v.push(interp.new(t));
                true
            }
            _ => false,
        };
        if !stored {
            self.push_boxed(interp, e);
        }
    }

    fn push_boxed(&mut self, interp: &mut Interpreter, e: Elem) {
        self.to_boxed(interp);
        let t = interp.elem_term(e);
        if let KindBuffer::Boxed(v) = self {
            v.push(interp.new(t));
        }
    }

    // Boxes everything collected so far.
    pub(crate) fn to_boxed(&mut self, interp: &mut Interpreter) {
        let elems: Vec<Elem> = match self {
            KindBuffer::Boxed(_) => return,
            KindBuffer::Undecided(capacity) => {
                *self = KindBuffer::Boxed(Vec::with_capacity(*capacity));
                return;
            }
            KindBuffer::Int(v) => v.iter().map(|&n| Elem::Int(n)).collect(),
            KindBuffer::Real(v) => v.iter().map(|&d| Elem::Real(d)).collect(),
            KindBuffer::Complex(v) => v.iter().map(|&z| Elem::Complex(z)).collect(),
        };
        log::trace!("speculation failed after {} elements, boxing", elems.len());
        let mut boxed = Vec::with_capacity(elems.len() + 1);
        for e in elems {
            let t = interp.elem_term(e);
            boxed.push(interp.new(t));
        }
        *self = KindBuffer::Boxed(boxed);
    }

    pub(crate) fn reverse(&mut self) {
        match self {
            KindBuffer::Undecided(_) => {}
            KindBuffer::Int(v) => v.reverse(),
            KindBuffer::Real(v) => v.reverse(),
            KindBuffer::Complex(v) => v.reverse(),
            KindBuffer::Boxed(v) => v.reverse(),
        }
    }

    /// Wraps the collected values as a rows x cols matrix. A buffer that
    /// never saw a value becomes an empty boxed matrix.
    pub(crate) fn finish(self, interp: &mut Interpreter, rows: usize, cols: usize) -> TermRef {
        debug_assert_eq!(self.len(), rows * cols);
        let m = match self {
            KindBuffer::Undecided(_) => Matrix::from_vec::<TermRef>(rows, cols, Vec::new()),
            KindBuffer::Int(v) => Matrix::from_vec(rows, cols, v),
            KindBuffer::Real(v) => Matrix::from_vec(rows, cols, v),
            KindBuffer::Complex(v) => Matrix::from_vec(rows, cols, v),
            KindBuffer::Boxed(v) => Matrix::from_vec(rows, cols, v),
        };
        interp.alloc_matrix(m)
    }

    // Row vector of everything collected.
    pub(crate) fn finish_row(self, interp: &mut Interpreter) -> TermRef {
        let n = self.len();
        self.finish(interp, 1, n)
    }

    /// Drops the buffer's references after a failed computation.
    pub(crate) fn discard(self, interp: &mut Interpreter) {
        if let KindBuffer::Boxed(v) = self {
            interp.free_vect(&v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    #[test]
    fn test_first_value_decides_kind() {
        let mut interp = interp();
        let mut buf = KindBuffer::new(3);
        for d in [1.0, 2.0, 3.0] {
            let t = interp.double(d);
            buf.push_term(&mut interp, t);
            // Unboxed values do not keep their terms alive
            assert!(!interp.is_live(t));
        }
        assert_eq!(buf.kind(), Some(MatrixKind::Real));
        let x = buf.finish_row(&mut interp);
        assert_eq!(interp.matrix_dim(x), Ok((1, 3)));
        assert_eq!(interp.matrix_kind(x), Some(MatrixKind::Real));
    }

    #[test]
    fn test_mismatch_switches_to_boxed() {
        let mut interp = interp();
        let mut buf = KindBuffer::new(3);
        let a = interp.int(1);
        buf.push_term(&mut interp, a);
        let b = interp.double(2.5);
        buf.push_term(&mut interp, b);
        assert_eq!(buf.kind(), Some(MatrixKind::Boxed));
        let c = interp.int(3);
        buf.push_term(&mut interp, c);
        assert_eq!(buf.kind(), Some(MatrixKind::Boxed));

        let x = buf.finish_row(&mut interp);
        assert_eq!(interp.refc(b), 1);
        assert_eq!(interp.render(x), "{1,2.5,3}");
    }

    #[test]
    fn test_promotion_of_matrix_elements() {
        let mut interp = interp();
        let mut buf = KindBuffer::with_kind(MatrixKind::Complex, 2);
        buf.push_elem(&mut interp, Elem::Int(1));
        buf.push_elem(&mut interp, Elem::Real(0.5));
        assert_eq!(buf.kind(), Some(MatrixKind::Complex));
        let s = interp.string("s");
        buf.push_elem(&mut interp, Elem::Term(s));
        assert_eq!(buf.kind(), Some(MatrixKind::Boxed));
        assert_eq!(buf.len(), 3);
        buf.discard(&mut interp);
        assert!(!interp.is_live(s));
    }

    #[test]
    fn test_empty_buffer_is_boxed() {
        let mut interp = interp();
        let x = KindBuffer::new(0).finish(&mut interp, 0, 4);
        assert_eq!(interp.matrix_kind(x), Some(MatrixKind::Boxed));
        assert_eq!(interp.matrix_dim(x), Ok((0, 4)));
    }
}
