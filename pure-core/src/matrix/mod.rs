// Matrix values
//
// A matrix term holds a header: dimensions, row stride, an offset into a
// shared data block, and the block itself. Slices, row/column views and
// reshapes share the block with the matrix they came from. The block lives
// as long as any header refers to it; for boxed matrices the element
// references belong to the block and are dropped with its last header.
//
// Zero-sized matrices keep one physical dummy row/column so the data pointer
// handed to native numeric code always points into an allocation. Their
// logical size stays zero. Boxed dummy cells hold the null handle.

mod buffer;
mod concat;
mod convert;
mod higher_order;

pub(crate) use buffer::KindBuffer;

use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::term::{TermData, TermRef};
use num_complex::Complex64;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

pub type Block<T> = Rc<RefCell<Vec<T>>>;

/// Element kind of a matrix. The declaration order is the generality order
/// used when kinds are unified: int < real < complex < boxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatrixKind {
    Int,
    Real,
    Complex,
    Boxed,
}

impl MatrixKind {
    pub fn name(self) -> &'static str {
        match self {
            MatrixKind::Int => "int",
            MatrixKind::Real => "real",
            MatrixKind::Complex => "complex",
            MatrixKind::Boxed => "boxed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum MatrixData {
    Boxed(Block<TermRef>),
    Real(Block<f64>),
    Complex(Block<Complex64>),
    Int(Block<i32>),
}

// RUST CONCEPT: One body, four element types
// Each arm binds the block under the same name, so the body is compiled once
// per element type.
macro_rules! with_block {
    ($data:expr, $b:ident => $body:expr) => {
        match $data {
            MatrixData::Boxed($b) => $body,
            MatrixData::Real($b) => $body,
            MatrixData::Complex($b) => $body,
            MatrixData::Int($b) => $body,
        }
    };
}

/// A single matrix element, detached from its block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Elem {
    Term(TermRef),
    Real(f64),
    Complex(Complex64),
    Int(i32),
}

impl Elem {
    pub fn kind(self) -> MatrixKind {
        match self {
            Elem::Term(_) => MatrixKind::Boxed,
            Elem::Real(_) => MatrixKind::Real,
            Elem::Complex(_) => MatrixKind::Complex,
            Elem::Int(_) => MatrixKind::Int,
        }
    }

    // Converts a numeric element to an equal or more general numeric kind.
    // Boxing is not a promotion; it needs the interpreter.
    pub(crate) fn promote(self, kind: MatrixKind) -> Option<Elem> {
        match (self, kind) {
            (Elem::Int(n), MatrixKind::Int) => Some(Elem::Int(n)),
            (Elem::Int(n), MatrixKind::Real) => Some(Elem::Real(f64::from(n))),
            (Elem::Int(n), MatrixKind::Complex) => Some(Elem::Complex(Complex64::new(f64::from(n), 0.0))),
            (Elem::Real(d), MatrixKind::Real) => Some(Elem::Real(d)),
            (Elem::Real(d), MatrixKind::Complex) => Some(Elem::Complex(Complex64::new(d, 0.0))),
            (Elem::Complex(z), MatrixKind::Complex) => Some(Elem::Complex(z)),
            (Elem::Term(t), MatrixKind::Boxed) => Some(Elem::Term(t)),
            _ => None,
        }
    }
}

/// Element types a block can hold.
pub trait Element: Copy + fmt::Debug {
    /// Filler for dummy cells of zero-sized matrices.
    const PAD: Self;
    fn wrap(block: Block<Self>) -> MatrixData;
    fn elem(self) -> Elem;
}

impl Element for TermRef {
    const PAD: Self = TermRef::NULL;
    fn wrap(block: Block<Self>) -> MatrixData {
        MatrixData::Boxed(block)
    }
    fn elem(self) -> Elem {
        Elem::Term(self)
    }
}

impl Element for f64 {
    const PAD: Self = 0.0;
    fn wrap(block: Block<Self>) -> MatrixData {
        MatrixData::Real(block)
    }
    fn elem(self) -> Elem {
        Elem::Real(self)
    }
}

impl Element for Complex64 {
    const PAD: Self = Complex64::new(0.0, 0.0);
    fn wrap(block: Block<Self>) -> MatrixData {
        MatrixData::Complex(block)
    }
    fn elem(self) -> Elem {
        Elem::Complex(self)
    }
}

impl Element for i32 {
    const PAD: Self = 0;
    fn wrap(block: Block<Self>) -> MatrixData {
        MatrixData::Int(block)
    }
    fn elem(self) -> Elem {
        Elem::Int(self)
    }
}

/// Header layout shared with native numeric libraries.
///
/// Fields come in a fixed order: the number of headers sharing the block,
/// the dimensions, the row stride, a pointer to the first element, a pointer
/// to the block, and whether this header allocated the block. Complex
/// elements are stored as (re, im) pairs of doubles.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawHeader {
    pub refc: usize,
    pub size1: usize,
    pub size2: usize,
    pub tda: usize,
    pub data: *mut c_void,
    pub block: *const c_void,
    pub owner: i32,
}

#[derive(Debug, Clone)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    stride: usize,
    offset: usize,
    owner: bool,
    pub(crate) data: MatrixData,
}

impl Matrix {
    // A fresh contiguous matrix holding `values` in row-major order.
    pub(crate) fn from_vec<T: Element>(rows: usize, cols: usize, mut values: Vec<T>) -> Matrix {
        debug_assert_eq!(values.len(), rows * cols);
        values.resize(rows.max(1) * cols.max(1), T::PAD);
        Matrix {
            rows,
            cols,
            stride: cols.max(1),
            offset: 0,
            owner: true,
            data: T::wrap(Rc::new(RefCell::new(values))),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn kind(&self) -> MatrixKind {
        match &self.data {
            MatrixData::Boxed(_) => MatrixKind::Boxed,
            MatrixData::Real(_) => MatrixKind::Real,
            MatrixData::Complex(_) => MatrixKind::Complex,
            MatrixData::Int(_) => MatrixKind::Int,
        }
    }

    /// Number of headers (this one included) sharing the data block.
    pub fn shared_count(&self) -> usize {
        with_block!(&self.data, b => Rc::strong_count(b))
    }

    pub fn shares_block_with(&self, other: &Matrix) -> bool {
        match (&self.data, &other.data) {
            (MatrixData::Boxed(a), MatrixData::Boxed(b)) => Rc::ptr_eq(a, b),
            (MatrixData::Real(a), MatrixData::Real(b)) => Rc::ptr_eq(a, b),
            (MatrixData::Complex(a), MatrixData::Complex(b)) => Rc::ptr_eq(a, b),
            (MatrixData::Int(a), MatrixData::Int(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    // Rows are laid out back to back, so the elements form one run.
    pub fn is_contiguous(&self) -> bool {
        self.rows <= 1 || self.stride == self.cols.max(1)
    }

    fn index(&self, i: usize, j: usize) -> usize {
        self.offset + i * self.stride + j
    }

    pub fn elem(&self, i: usize, j: usize) -> Elem {
        let k = self.index(i, j);
        with_block!(&self.data, b => b.borrow()[k].elem())
    }

    /// All elements in row-major order.
    pub fn elems(&self) -> Vec<Elem> {
        let mut out = Vec::with_capacity(self.len());
        with_block!(&self.data, b => {
            let data = b.borrow();
            for i in 0..self.rows {
                let start = self.index(i, 0);
                out.extend(data[start..start + self.cols].iter().map(|v| v.elem()));
            }
        });
        out
    }

    // Another header over the same block.
    fn view(&self, rows: usize, cols: usize, stride: usize, offset: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            stride,
            offset,
            owner: false,
            data: self.data.clone(),
        }
    }

    // Copies the element at physical index `at(i, j)` to each position of a
    // fresh rows x cols matrix of the same kind.
    fn gather(&self, rows: usize, cols: usize, at: impl Fn(usize, usize) -> usize) -> Matrix {
        with_block!(&self.data, b => {
            let data = b.borrow();
            let mut out = Vec::with_capacity(rows * cols);
            for i in 0..rows {
                for j in 0..cols {
                    out.push(data[at(i, j)]);
                }
            }
            Matrix::from_vec(rows, cols, out)
        })
    }

    // Contiguous copy with the same shape.
    fn copy(&self) -> Matrix {
        self.gather(self.rows, self.cols, |i, j| self.index(i, j))
    }

    // Same elements, new shape. Only valid for contiguous headers.
    fn reshaped(&self, rows: usize, cols: usize) -> Matrix {
        debug_assert!(self.is_contiguous());
        let mut m = self.view(rows, cols, cols.max(1), self.offset);
        m.owner = self.owner;
        m
    }

    // Non-null terms stored anywhere in a boxed block.
    fn block_terms(&self) -> Vec<TermRef> {
        match &self.data {
            MatrixData::Boxed(b) => b.borrow().iter().copied().filter(|t| !t.is_null()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn raw_header(&self) -> RawHeader {
        let (refc, data, block) = with_block!(&self.data, b => (
            Rc::strong_count(b),
            b.borrow_mut().as_mut_ptr().wrapping_add(self.offset) as *mut c_void,
            Rc::as_ptr(b) as *const c_void,
        ));
        RawHeader {
            refc,
            size1: self.rows,
            size2: self.cols,
            tda: self.stride,
            data,
            block,
            owner: i32::from(self.owner),
        }
    }
}

impl Interpreter {
    pub fn matrix(&self, x: TermRef) -> Option<&Matrix> {
        match self.data_of(x) {
            TermData::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn matrix_kind(&self, x: TermRef) -> Option<MatrixKind> {
        self.matrix(x).map(Matrix::kind)
    }

    // Header copy for operations that need `&mut self` while reading it.
    pub(crate) fn matrix_header(&self, x: TermRef) -> Result<Matrix, RuntimeError> {
        self.matrix(x).cloned().ok_or(RuntimeError::NotAMatrix)
    }

    // Wraps a header whose boxed elements already carry the block's
    // references.
    pub(crate) fn alloc_matrix(&mut self, m: Matrix) -> TermRef {
        self.heap.alloc(TermData::Matrix(m))
    }

    // Wraps a header over a freshly copied block, taking the block's
    // references to its elements.
    fn adopt_matrix(&mut self, m: Matrix) -> TermRef {
        let terms = m.block_terms();
        self.new_vect(&terms);
        self.alloc_matrix(m)
    }

    /// Fresh zero-filled matrix. Boxed matrices are filled with the integer 0.
    pub fn matrix_new(&mut self, kind: MatrixKind, rows: usize, cols: usize) -> TermRef {
        let n = rows * cols;
        let m = match kind {
            MatrixKind::Int => Matrix::from_vec(rows, cols, vec![0i32; n]),
            MatrixKind::Real => Matrix::from_vec(rows, cols, vec![0.0f64; n]),
            MatrixKind::Complex => Matrix::from_vec(rows, cols, vec![Complex64::new(0.0, 0.0); n]),
            MatrixKind::Boxed => {
                let cells = match n {
                    0 => Vec::new(),
                    _ => vec![self.int(0); n],
                };
                Matrix::from_vec(rows, cols, cells)
            }
        };
        let x = self.adopt_matrix(m);
        log::trace!("new {} matrix {}x{}", kind.name(), rows, cols);
        x
    }

    pub fn real_matrix(&mut self, rows: usize, cols: usize, data: &[f64]) -> Result<TermRef, RuntimeError> {
        check_len(rows, cols, data.len())?;
        Ok(self.alloc_matrix(Matrix::from_vec(rows, cols, data.to_vec())))
    }

    pub fn int_matrix(&mut self, rows: usize, cols: usize, data: &[i32]) -> Result<TermRef, RuntimeError> {
        check_len(rows, cols, data.len())?;
        Ok(self.alloc_matrix(Matrix::from_vec(rows, cols, data.to_vec())))
    }

    pub fn complex_matrix(
        &mut self,
        rows: usize,
        cols: usize,
        data: &[Complex64],
    ) -> Result<TermRef, RuntimeError> {
        check_len(rows, cols, data.len())?;
        Ok(self.alloc_matrix(Matrix::from_vec(rows, cols, data.to_vec())))
    }

    // The matrix takes a reference to each element.
    pub fn boxed_matrix(
        &mut self,
        rows: usize,
        cols: usize,
        data: &[TermRef],
    ) -> Result<TermRef, RuntimeError> {
        check_len(rows, cols, data.len())?;
        if data.iter().any(|t| t.is_null()) {
            return Err(RuntimeError::BadShape("null element".to_string()));
        }
        Ok(self.adopt_matrix(Matrix::from_vec(rows, cols, data.to_vec())))
    }

    /// Copy of a matrix with its own data block.
    pub fn matrix_dup(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        Ok(self.adopt_matrix(m.copy()))
    }

    pub fn matrix_dim(&self, x: TermRef) -> Result<(usize, usize), RuntimeError> {
        let m = self.matrix(x).ok_or(RuntimeError::NotAMatrix)?;
        Ok((m.rows(), m.cols()))
    }

    pub fn matrix_size(&self, x: TermRef) -> Result<usize, RuntimeError> {
        Ok(self.matrix(x).ok_or(RuntimeError::NotAMatrix)?.len())
    }

    pub fn matrix_stride(&self, x: TermRef) -> Result<usize, RuntimeError> {
        Ok(self.matrix(x).ok_or(RuntimeError::NotAMatrix)?.stride())
    }

    pub fn matrix_raw_header(&self, x: TermRef) -> Result<RawHeader, RuntimeError> {
        Ok(self.matrix(x).ok_or(RuntimeError::NotAMatrix)?.raw_header())
    }

    // Term for a detached element. Boxed elements are returned as stored;
    // numeric ones become fresh terms.
    pub(crate) fn elem_term(&mut self, e: Elem) -> TermRef {
        match e {
            Elem::Term(t) => t,
            Elem::Int(n) => self.int(n),
            Elem::Real(d) => self.double(d),
            Elem::Complex(z) => self.complex(z.re, z.im),
        }
    }

    // Element view of a term, as used when storing it into a matrix.
    pub(crate) fn term_elem(&self, t: TermRef) -> Elem {
        if let Some(n) = self.int_val(t) {
            Elem::Int(n)
        } else if let Some(d) = self.double_val(t) {
            Elem::Real(d)
        } else if let Some(z) = self.complex_val(t) {
            Elem::Complex(z)
        } else {
            Elem::Term(t)
        }
    }

    /// Element `k` in row-major order.
    pub fn matrix_elem_at(&mut self, x: TermRef, k: usize) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if k >= m.len() {
            return Err(RuntimeError::IndexOutOfRange { index: k, len: m.len() });
        }
        let e = m.elem(k / m.cols(), k % m.cols());
        Ok(self.elem_term(e))
    }

    pub fn matrix_elem_at2(&mut self, x: TermRef, i: usize, j: usize) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if i >= m.rows() {
            return Err(RuntimeError::IndexOutOfRange { index: i, len: m.rows() });
        }
        if j >= m.cols() {
            return Err(RuntimeError::IndexOutOfRange { index: j, len: m.cols() });
        }
        let e = m.elem(i, j);
        Ok(self.elem_term(e))
    }

    /// Rows `i1..=i2`, columns `j1..=j2`, as a view sharing the data block.
    /// Bounds are clamped to the matrix; an empty range gives an empty
    /// matrix of the same kind.
    pub fn matrix_slice(
        &mut self,
        x: TermRef,
        i1: i64,
        j1: i64,
        i2: i64,
        j2: i64,
    ) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        let (rows, r0) = clamp_range(i1, i2, m.rows());
        let (cols, c0) = clamp_range(j1, j2, m.cols());
        if rows == 0 || cols == 0 {
            return Ok(self.matrix_new(m.kind(), rows, cols));
        }
        let v = m.view(rows, cols, m.stride(), m.index(r0, c0));
        Ok(self.alloc_matrix(v))
    }

    pub fn matrix_row(&mut self, x: TermRef, i: usize) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if i >= m.rows() {
            return Err(RuntimeError::IndexOutOfRange { index: i, len: m.rows() });
        }
        let v = m.view(1, m.cols(), m.stride(), m.index(i, 0));
        Ok(self.alloc_matrix(v))
    }

    pub fn matrix_col(&mut self, x: TermRef, j: usize) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if j >= m.cols() {
            return Err(RuntimeError::IndexOutOfRange { index: j, len: m.cols() });
        }
        let v = m.view(m.rows(), 1, m.stride(), m.index(0, j));
        Ok(self.alloc_matrix(v))
    }

    /// Same elements in a rows x cols shape. Contiguous matrices are
    /// reshaped in place (sharing the block); others are copied.
    pub fn matrix_redim(&mut self, x: TermRef, rows: usize, cols: usize) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if rows * cols != m.len() {
            return Err(RuntimeError::BadShape(format!(
                "cannot reshape {}x{} to {}x{}",
                m.rows(),
                m.cols(),
                rows,
                cols
            )));
        }
        if m.is_contiguous() {
            let mut v = m.reshaped(rows, cols);
            v.owner = false;
            Ok(self.alloc_matrix(v))
        } else {
            Ok(self.adopt_matrix(m.copy().reshaped(rows, cols)))
        }
    }

    // Vectors are transposed as views; everything else is copied.
    pub fn matrix_transpose(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        let (rows, cols) = (m.rows(), m.cols());
        if rows <= 1 {
            return Ok(self.alloc_matrix(m.view(cols, rows, 1, m.offset)));
        }
        if cols == 1 && m.stride() == 1 {
            return Ok(self.alloc_matrix(m.view(1, rows, rows, m.offset)));
        }
        Ok(self.adopt_matrix(m.gather(cols, rows, |i, j| m.index(j, i))))
    }

    /// Main diagonal as a row vector.
    pub fn matrix_diag(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        self.matrix_subdiag(x, 0)
    }

    // k-th diagonal below the main one (above it for negative k).
    pub fn matrix_subdiag(&mut self, x: TermRef, k: i64) -> Result<TermRef, RuntimeError> {
        self.offset_diag(x, k >= 0, k.unsigned_abs())
    }

    pub fn matrix_supdiag(&mut self, x: TermRef, k: i64) -> Result<TermRef, RuntimeError> {
        self.offset_diag(x, k < 0, k.unsigned_abs())
    }

    // Offsets past the last row or column give an empty 1x0 result.
    fn offset_diag(&mut self, x: TermRef, below: bool, k: u64) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        let k = usize::try_from(k).unwrap_or(usize::MAX);
        let d = if below {
            let n = m.rows().saturating_sub(k).min(m.cols());
            m.gather(1, n, |_, j| m.index(j + k, j))
        } else {
            let n = m.cols().saturating_sub(k).min(m.rows());
            m.gather(1, n, |_, j| m.index(j, j + k))
        };
        Ok(self.adopt_matrix(d))
    }

    /// Square matrix with the row vector `x` on its diagonal and zeros
    /// elsewhere.
    pub fn matrix_diagm(&mut self, x: TermRef) -> Result<TermRef, RuntimeError> {
        let m = self.matrix_header(x)?;
        if m.rows() != 1 {
            return Err(RuntimeError::BadShape(format!(
                "diagm expects a row vector, got {}x{}",
                m.rows(),
                m.cols()
            )));
        }
        let n = m.cols();
        let zero = match m.kind() {
            MatrixKind::Int => Elem::Int(0),
            MatrixKind::Real => Elem::Real(0.0),
            MatrixKind::Complex => Elem::Complex(Complex64::new(0.0, 0.0)),
            // The filler is only allocated if an off-diagonal cell holds it
            MatrixKind::Boxed if n > 1 => Elem::Term(self.int(0)),
            MatrixKind::Boxed => Elem::Term(TermRef::NULL),
        };
        let mut out = KindBuffer::with_kind(m.kind(), n * n);
        for i in 0..n {
            for j in 0..n {
                let e = if i == j { m.elem(0, j) } else { zero };
                out.push_elem(self, e);
            }
        }
        Ok(out.finish(self, n, n))
    }
}

fn check_len(rows: usize, cols: usize, len: usize) -> Result<(), RuntimeError> {
    if rows.checked_mul(cols) != Some(len) {
        return Err(RuntimeError::BadShape(format!(
            "{} elements do not fill a {}x{} matrix",
            len, rows, cols
        )));
    }
    Ok(())
}

// Inclusive index range lo..=hi clamped to 0..n. Returns (count, start).
fn clamp_range(lo: i64, hi: i64, n: usize) -> (usize, usize) {
    let lo = lo.max(0);
    let hi = hi.min(n as i64 - 1);
    if lo >= n as i64 || hi < lo {
        (0, 0)
    } else {
        ((hi - lo + 1) as usize, lo as usize)
    }
}
