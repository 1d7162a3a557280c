// Row and column concatenation
//
// Operands are matrices or scalars; a scalar counts as a 1x1 matrix of the
// kind it would be stored as. Empty matrices are skipped. The result kind is
// the most general operand kind, so an int row joined with a real row gives
// a real matrix and anything non-numeric makes the result boxed.
//
// On success the operands are consumed (fresh ones are collected). On a
// shape error they are left untouched.

use super::{Elem, KindBuffer, Matrix, MatrixKind};
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::term::TermRef;

enum Part {
    Scalar(TermRef, Elem),
    Block(Matrix),
}

impl Part {
    fn dims(&self) -> (usize, usize) {
        match self {
            Part::Scalar(..) => (1, 1),
            Part::Block(m) => (m.rows(), m.cols()),
        }
    }

    fn kind(&self) -> MatrixKind {
        match self {
            Part::Scalar(_, e) => e.kind(),
            Part::Block(m) => m.kind(),
        }
    }

    fn elem(&self, i: usize, j: usize, kind: MatrixKind) -> Elem {
        match self {
            // Boxed results keep the scalar term itself
            Part::Scalar(t, _) if kind == MatrixKind::Boxed => Elem::Term(*t),
            Part::Scalar(_, e) => *e,
            Part::Block(m) => m.elem(i, j),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    Rows,
    Columns,
}

impl Interpreter {
    /// Stacks the operands vertically: `{x; y; ...}`.
    pub fn matrix_rows(&mut self, xs: &[TermRef]) -> Result<TermRef, RuntimeError> {
        self.concat(xs, Axis::Rows)
    }

    /// Places the operands side by side: `{x, y, ...}`.
    pub fn matrix_columns(&mut self, xs: &[TermRef]) -> Result<TermRef, RuntimeError> {
        self.concat(xs, Axis::Columns)
    }

    fn concat(&mut self, xs: &[TermRef], axis: Axis) -> Result<TermRef, RuntimeError> {
        let mut parts = Vec::with_capacity(xs.len());
        for &x in xs {
            let part = match self.matrix(x) {
                Some(m) if m.is_empty() => continue,
                Some(m) => Part::Block(m.clone()),
                None => Part::Scalar(x, self.term_elem(x)),
            };
            parts.push(part);
        }

        // (extent along the axis, common extent across it)
        let mut along = 0;
        let mut across: Option<usize> = None;
        for part in &parts {
            let (r, c) = part.dims();
            let (a, b) = match axis {
                Axis::Rows => (r, c),
                Axis::Columns => (c, r),
            };
            match across {
                Some(k) if k != b => {
                    let what = if axis == Axis::Rows { "column" } else { "row" };
                    return Err(RuntimeError::BadShape(format!(
                        "{} count mismatch: {} vs {}",
                        what, k, b
                    )));
                }
                _ => across = Some(b),
            }
            along += a;
        }

        if let [x] = xs {
            if matches!(parts.as_slice(), [Part::Block(_)]) {
                return Ok(*x);
            }
        }

        let across = across.unwrap_or(0);
        let (rows, cols) = match axis {
            Axis::Rows => (along, across),
            Axis::Columns => (across, along),
        };
        let kind = parts.iter().map(Part::kind).max().unwrap_or(MatrixKind::Boxed);
        let mut out = KindBuffer::with_kind(kind, rows * cols);
        match axis {
            Axis::Rows => {
                for part in &parts {
                    let (r, c) = part.dims();
                    for i in 0..r {
                        for j in 0..c {
                            out.push_elem(self, part.elem(i, j, kind));
                        }
                    }
                }
            }
            Axis::Columns => {
                for i in 0..rows {
                    for part in &parts {
                        for j in 0..part.dims().1 {
                            out.push_elem(self, part.elem(i, j, kind));
                        }
                    }
                }
            }
        }
        let result = out.finish(self, rows, cols);

        // Header copies must go before the operands, or a released boxed
        // operand would not see itself as the last user of its block.
        drop(parts);
        self.new_vect(xs);
        self.free_vect(xs);
        log::trace!("concatenated {} operands into {}x{} {}", xs.len(), rows, cols, kind.name());
        Ok(result)
    }
}
