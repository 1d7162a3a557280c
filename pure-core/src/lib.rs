//! # Pure Core
//!
//! Execution core of the Pure functional language runtime: the term
//! representation and its reference-counted ownership model, the calling
//! convention for curried calls and lazy thunks, non-local exceptions,
//! matrix values, and the namespace-aware symbol table.
//!
//! Compiled code and adapter libraries never touch the representation
//! directly; they go through the operations on [`Interpreter`].
//!
//! ## Features
//!
//! - **Exact collection**: terms are freed the moment their last owner lets
//!   go, with iterative release so deep structures cannot overflow the stack
//! - **Curried calls**: partial application, tail calls in constant space
//! - **Thunks**: forced at most once, their value shared afterwards
//! - **Exceptions**: catch frames restore the shadow stack on unwind; signals
//!   and native stack exhaustion arrive as ordinary exceptions
//! - **Matrices**: int, real, complex and boxed element kinds sharing one
//!   header layout, with zero-copy views
//!
//! ## Example
//!
//! ```
//! use pure_core::{Interpreter, MatrixKind};
//!
//! let mut interp = Interpreter::from_env();
//! let a = interp.real_matrix(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
//! let b = interp.real_matrix(1, 2, &[5.0, 6.0]).unwrap();
//! let x = interp.matrix_rows(&[a, b]).unwrap();
//!
//! assert_eq!(interp.matrix_dim(x), Ok((3, 2)));
//! assert_eq!(interp.matrix_kind(x), Some(MatrixKind::Real));
//! assert_eq!(interp.render(x), "{1.0,2.0;3.0,4.0;5.0,6.0}");
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod exceptions;
pub mod heap;
pub mod interpreter;
pub mod matrix;
pub mod render;
pub mod shadow_stack;
pub mod symtab;
pub mod term;

// Interpreter operations, implemented in separate files
mod calling;
mod globals;
mod inspect;
mod ownership;
mod terms;

// Re-exports for convenience
pub use config::RuntimeConfig;
pub use error::{Exception, RuntimeError};
pub use exceptions::{TrapAction, pending_signal, raise_signal};
#[cfg(feature = "signals")]
pub use exceptions::trap;
pub use heap::HeapStats;
pub use interpreter::{InterpHandle, Interpreter, create_interp, current_interp, switch_interp, with_current};
pub use matrix::{Elem, Matrix, MatrixKind, RawHeader};
pub use symtab::{Fixity, Lookup, SymbolTable};
pub use term::{Closure, EntryFn, Outcome, SymId, TermKind, TermRef};
