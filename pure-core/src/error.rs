// Error types for the execution core
//
// Two channels exist side by side:
// - RuntimeError: construction/representation failures returned synchronously
//   from builder entry points (bad matrix shape, symbol not visible, ...)
// - Exception: a language-level exception in flight, carrying a payload term
//   up to the nearest catch frame (see exceptions.rs)
//
// Invariant violations (refcount underflow, stale handles, double free) are
// neither; they go through `fatal` and stop the process.

use crate::term::TermRef;
use thiserror::Error;

// RUST CONCEPT: thiserror derives Display and std::error::Error from the
// #[error] attributes, so each variant documents its own message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("bad matrix shape: {0}")]
    BadShape(String),
    #[error("matrix element kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("symbol '{0}' is ambiguous here")]
    AmbiguousSymbol(String),
    #[error("symbol '{0}' is private here")]
    PrivateSymbol(String),
    #[error("invalid symbol id {0}")]
    InvalidSymbol(u32),
    #[error("precedence {0} out of range (0..=10)")]
    BadPrecedence(u8),
    #[error("cannot redefine constant '{0}'")]
    ConstantRedefinition(String),
    #[error("not a matrix")]
    NotAMatrix,
    #[error("signal trap failed for signal {0}")]
    SignalTrap(i32),
}

// A language-level exception travelling towards the nearest catch frame.
//
// The payload is owned by the exception (one reference). Exceptions can only
// be produced by `Interpreter::throw`, which guarantees an enclosing frame
// exists to receive them.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an exception must be propagated to its catch frame"]
pub struct Exception {
    payload: TermRef,
}

impl Exception {
    pub(crate) fn new(payload: TermRef) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> TermRef {
        self.payload
    }

    // Hands the payload reference to the caller.
    pub(crate) fn into_payload(self) -> TermRef {
        self.payload
    }
}

// Reports a broken ownership invariant and stops.
//
// With the dev profile's `panic = "abort"` this terminates a debug build
// immediately; test harnesses still observe it as a panic.
#[cold]
#[track_caller]
pub(crate) fn fatal(msg: core::fmt::Arguments<'_>) -> ! {
    log::error!("fatal runtime error: {}", msg);
    panic!("fatal runtime error: {}", msg)
}
