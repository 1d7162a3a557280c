// Term representation
//
// Terms live in the per-instance heap (heap.rs) and are addressed through
// generational handles. A handle is only meaningful for the instance that
// created it; a handle whose slot was recycled is detected as stale.

use crate::error::Exception;
use crate::interpreter::Interpreter;
use crate::matrix::Matrix;
use core::fmt;
use num_bigint::BigInt;
use smallvec::SmallVec;

/// Numeric symbol id. Symbols are numbered consecutively from 1; 0 marks an
/// anonymous closure.
pub type SymId = u32;

pub const ANONYMOUS: SymId = 0;

// RUST CONCEPT: Generational index
// `index` picks the slot, `generation` must match the slot's current
// generation. Recycling a slot bumps its generation, so stale handles are
// caught instead of silently aliasing a new term.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermRef {
    index: u32,
    generation: u32,
}

impl TermRef {
    /// Placeholder used for the dummy cell of empty boxed matrices. Never
    /// refers to a heap slot.
    pub const NULL: TermRef = TermRef {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for TermRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "TermRef(null)")
        } else {
            write!(f, "TermRef({}@{})", self.index, self.generation)
        }
    }
}

/// What a native entry point hands back to the calling convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ordinary result. The caller does not take a reference; the term is
    /// either fresh (floating on tmps) or owned elsewhere.
    Value(TermRef),
    /// Tail call: the result is `f args...`. The runtime compacts the shadow
    /// stack before performing the call, so self and mutual tail recursion
    /// runs in bounded space.
    TailCall(TermRef, SmallVec<[TermRef; 4]>),
}

// Native entry point of a closure.
//
// `args` are the call arguments in order, `env` the captured environment.
// Both are rooted on the shadow stack for the duration of the call; an entry
// that wants to keep one of them must take its own reference with `new`.
pub type EntryFn =
    fn(&mut Interpreter, args: &[TermRef], env: &[TermRef]) -> Result<Outcome, Exception>;

#[derive(Clone)]
pub struct Closure {
    pub entry: EntryFn,
    /// Captured environment; each element holds one reference.
    pub env: Vec<TermRef>,
    /// Declared arity. Zero means a parameterless function (global) or a
    /// thunk body.
    pub arity: u32,
    /// Local (anonymous, possibly capturing) vs. global closure.
    pub local: bool,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("entry", &(self.entry as usize as *const ()))
            .field("env", &self.env)
            .field("arity", &self.arity)
            .field("local", &self.local)
            .finish()
    }
}

/// A function or symbol node. Plain symbols have no closure.
#[derive(Debug, Clone)]
pub struct Fun {
    pub sym: SymId,
    pub closure: Option<Closure>,
}

// RUST CONCEPT: Indirection cell for memoized thunks
// A thunk starts out pending; forcing it stores the value (owning one
// reference) in the same cell. Every holder of the thunk's handle then sees
// the value through the cell.
#[derive(Debug, Clone)]
pub enum ThunkCell {
    Pending(Closure),
    Forced(TermRef),
}

#[derive(Debug)]
pub enum TermData {
    Int(i32),
    BigInt(BigInt),
    Double(f64),
    Str(String),
    Pointer(usize),
    Matrix(Matrix),
    /// Function applied to argument; both children are owned.
    App(TermRef, TermRef),
    Fun(Fun),
    Thunk(ThunkCell),
    /// Slot is on the free list.
    Vacant,
}

/// Coarse type tag used for dispatch by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Int,
    BigInt,
    Double,
    Str,
    Pointer,
    Matrix,
    App,
    Symbol,
    Function,
    Thunk,
}

impl TermKind {
    pub fn name(self) -> &'static str {
        match self {
            TermKind::Int => "int",
            TermKind::BigInt => "bigint",
            TermKind::Double => "double",
            TermKind::Str => "string",
            TermKind::Pointer => "pointer",
            TermKind::Matrix => "matrix",
            TermKind::App => "application",
            TermKind::Symbol => "symbol",
            TermKind::Function => "function",
            TermKind::Thunk => "thunk",
        }
    }
}

impl TermData {
    pub fn kind(&self) -> Option<TermKind> {
        Some(match self {
            TermData::Int(_) => TermKind::Int,
            TermData::BigInt(_) => TermKind::BigInt,
            TermData::Double(_) => TermKind::Double,
            TermData::Str(_) => TermKind::Str,
            TermData::Pointer(_) => TermKind::Pointer,
            TermData::Matrix(_) => TermKind::Matrix,
            TermData::App(..) => TermKind::App,
            TermData::Fun(Fun { closure: None, .. }) => TermKind::Symbol,
            TermData::Fun(Fun {
                closure: Some(_), ..
            }) => TermKind::Function,
            TermData::Thunk(_) => TermKind::Thunk,
            TermData::Vacant => return None,
        })
    }

    // Sentries can only be attached to applications and pointers.
    pub(crate) fn accepts_sentry(&self) -> bool {
        matches!(self, TermData::App(..) | TermData::Pointer(_))
    }
}
