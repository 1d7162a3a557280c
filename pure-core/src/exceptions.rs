// Exceptions, stack guard and signals
//
// A throw is an `Err(Exception)` travelling up the native call chain. Every
// catch point records the shadow-stack depth on entry; when an exception
// reaches it, everything pushed above that depth is released before the
// handler runs. A throw with no catch point at all is fatal and aborts the
// process after reporting the payload.
//
// Asynchronous signals only set a flag. It is polled at safe points
// (`check_all`, run before every native call) and turned into a
// `signal SIG` exception there.

use crate::error::Exception;
#[cfg(feature = "signals")]
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::term::{SymId, TermRef};
use std::sync::atomic::{AtomicI32, Ordering};

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExceptionFrame {
    // Shadow-stack depth when the frame was entered.
    pub(crate) depth: usize,
}

// Address of a local variable, used to measure native stack usage.
#[inline(never)]
pub(crate) fn stack_address(marker: &u8) -> usize {
    std::hint::black_box(marker) as *const u8 as usize
}

// Set by the OS signal handler, cleared when the signal is delivered as an
// exception (or by any throw).
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Marks `sig` as pending for whichever instance reaches a safe point first.
/// This is all the installed signal handler does.
pub fn raise_signal(sig: i32) {
    PENDING_SIGNAL.store(sig, Ordering::SeqCst);
}

pub fn pending_signal() -> Option<i32> {
    match PENDING_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    // Deliver the signal as an exception.
    Catch,
    Ignore,
    // Restore the system default.
    Default,
}

#[cfg(feature = "signals")]
extern "C" fn on_signal(sig: libc::c_int) {
    PENDING_SIGNAL.store(sig, Ordering::SeqCst);
}

/// Installs or removes the handler for `sig`.
#[cfg(feature = "signals")]
pub fn trap(action: TrapAction, sig: i32) -> Result<(), RuntimeError> {
    let handler = match action {
        TrapAction::Catch => on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        TrapAction::Ignore => libc::SIG_IGN,
        TrapAction::Default => libc::SIG_DFL,
    };
    // RUST CONCEPT: FFI is unsafe
    // The handler only stores into an atomic, which is async-signal-safe.
    let previous = unsafe { libc::signal(sig, handler) };
    if previous == libc::SIG_ERR {
        return Err(RuntimeError::SignalTrap(sig));
    }
    log::debug!("trap: signal {} -> {:?}", sig, action);
    Ok(())
}

impl Interpreter {
    // Turns `payload` into an exception. Clears any pending signal. The
    // exception holds a reference to the payload.
    pub fn throw(&mut self, payload: TermRef) -> Exception {
        PENDING_SIGNAL.store(0, Ordering::SeqCst);
        self.pending_signal = 0;
        self.new(payload);
        if self.estk.is_empty() {
            let shown = self.render(payload);
            log::error!("unhandled exception '{}'", shown);
            eprintln!("unhandled exception '{}'", shown);
            std::process::abort();
        }
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "throw {} (catch depth {})",
                self.render(payload),
                self.estk.len()
            );
        }
        Exception::new(payload)
    }

    pub fn throw_symbol(&mut self, sym: SymId) -> Exception {
        let payload = self.symbol(sym);
        self.throw(payload)
    }

    // `failed_cond`: a conditional or predicate did not yield a truth value.
    pub fn failed_cond(&mut self) -> Exception {
        let sym = self.symtab.builtins().failed_cond;
        self.throw_symbol(sym)
    }

    pub fn failed_match(&mut self) -> Exception {
        let sym = self.symtab.builtins().failed_match;
        self.throw_symbol(sym)
    }

    // `bad_matrix_value x`: `x` cannot be stored in the matrix at hand.
    pub fn bad_matrix_value(&mut self, x: TermRef) -> Exception {
        let sym = self.symtab.builtins().bad_matrix;
        let f = self.symbol(sym);
        let payload = self.app_node(f, x);
        self.throw(payload)
    }

    // `signal sig`
    pub fn signal_term(&mut self, sig: i32) -> TermRef {
        let sym = self.symtab.builtins().signal;
        let f = self.symbol(sym);
        let n = self.int(sig);
        self.app_node(f, n)
    }

    /// Marks a signal pending for this instance only. It is delivered at the
    /// next safe point, like an OS signal.
    pub fn raise(&mut self, sig: i32) {
        self.pending_signal = sig;
    }

    // Evaluates `x` with `h` as exception handler. `x` is forced if it is a
    // thunk and called if it is a parameterless function; any other term is
    // returned as is. Both arguments must be owned and are consumed.
    //
    // On an exception the shadow stack is restored to its depth on entry,
    // then `h` is applied to the payload. Exceptions thrown by the handler
    // propagate to the next enclosing catch.
    pub fn catch(&mut self, h: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.expect_owned(h, "catch");
        self.expect_owned(x, "catch");
        if !self.is_thunk(x) && self.arity(x) != Some(0) {
            self.free(h);
            self.unref(x);
            return Ok(x);
        }
        if let Err(e) = self.check_stack() {
            self.free(h);
            self.free(x);
            return Err(e);
        }
        let res = self.invoke(|interp| {
            if interp.is_thunk(x) {
                interp.force(x)
            } else {
                interp.call(x)
            }
        });
        match res {
            Ok(r) => {
                self.ref_(r);
                self.free(h);
                self.free(x);
                self.unref(r);
                Ok(r)
            }
            Err(payload) => {
                self.free(x);
                self.handle(h, payload)
            }
        }
    }

    // Native form of `catch`: runs `f` under the handler `h` (owned,
    // consumed).
    pub fn catch_with<F>(&mut self, h: TermRef, f: F) -> Result<TermRef, Exception>
    where
        F: FnOnce(&mut Self) -> Result<TermRef, Exception>,
    {
        self.expect_owned(h, "catch");
        if let Err(e) = self.check_stack() {
            self.free(h);
            return Err(e);
        }
        match self.invoke(f) {
            Ok(r) => {
                self.ref_(r);
                self.free(h);
                self.unref(r);
                Ok(r)
            }
            Err(payload) => self.handle(h, payload),
        }
    }

    // Signals stay masked until the handler reaches its first safe point.
    fn handle(&mut self, h: TermRef, payload: TermRef) -> Result<TermRef, Exception> {
        self.brkmask = true;
        self.apply(h, payload)
    }

    // Runs `f` as a catch point without a handler. An exception comes back
    // as its payload, which the caller then owns.
    pub fn invoke<F>(&mut self, f: F) -> Result<TermRef, TermRef>
    where
        F: FnOnce(&mut Self) -> Result<TermRef, Exception>,
    {
        let depth = self.sstk.depth();
        self.estk.push(ExceptionFrame { depth });
        let res = f(self);
        self.estk.pop();
        match res {
            Ok(r) => Ok(r),
            Err(e) => {
                self.unwind_to(depth);
                Err(e.into_payload())
            }
        }
    }

    pub fn catch_depth(&self) -> usize {
        self.estk.len()
    }

    pub fn stack_max(&self) -> usize {
        self.config.stack_max
    }

    // 0 disables the stack guard.
    pub fn set_stack_max(&mut self, bytes: usize) {
        self.config.stack_max = bytes;
    }

    // Makes the caller's frame the base for stack usage measurement. An
    // embedding that creates the instance deep inside its own call chain can
    // call this from its outermost frame.
    pub fn reset_stack_base(&mut self) {
        let marker = 0u8;
        self.stack_base = stack_address(&marker);
    }

    // Native stack bytes in use since the stack base.
    pub fn stack_usage(&self) -> usize {
        let marker = 0u8;
        stack_address(&marker).abs_diff(self.stack_base)
    }

    pub(crate) fn check_stack(&mut self) -> Result<(), Exception> {
        let max = self.config.stack_max;
        if max == 0 {
            return Ok(());
        }
        let used = self.stack_usage();
        if used >= max {
            log::debug!("stack fault: {} bytes in use, limit {}", used, max);
            let sym = self.symtab.builtins().stack_fault;
            return Err(self.throw_symbol(sym));
        }
        Ok(())
    }

    // Safe point: checks the stack, then delivers a pending signal. A stack
    // fault takes precedence and also lifts the break mask.
    pub(crate) fn check_all(&mut self) -> Result<(), Exception> {
        if let Err(e) = self.check_stack() {
            self.brkmask = false;
            return Err(e);
        }
        let sig = match self.pending_signal {
            0 => PENDING_SIGNAL.load(Ordering::SeqCst),
            sig => sig,
        };
        if sig != 0 && !self.brkmask {
            log::debug!("delivering signal {}", sig);
            let payload = self.signal_term(sig);
            return Err(self.throw(payload));
        }
        self.brkmask = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::error::Exception;
    use crate::interpreter::Interpreter;
    use crate::term::{Outcome, TermRef};

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    fn boom(
        interp: &mut Interpreter,
        _args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let payload = interp.string("boom");
        Err(interp.throw(payload))
    }

    fn identity(
        _interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        Ok(Outcome::Value(args[0]))
    }

    fn seven(
        interp: &mut Interpreter,
        _args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        Ok(Outcome::Value(interp.int(7)))
    }

    #[test]
    fn test_catch_delivers_payload_to_handler() {
        let mut interp = interp();
        let h = interp.closure(identity, 1, &[]);
        let x = interp.thunk(boom, &[]);
        interp.new_args(&[h, x]);

        let r = interp.catch(h, x).unwrap();
        assert_eq!(interp.string_val(r), Some("boom"));
        assert_eq!(interp.shadow_depth(), 0);
        assert_eq!(interp.catch_depth(), 0);
        assert!(!interp.is_live(h));
        assert!(!interp.is_live(x));
    }

    #[test]
    fn test_catch_without_exception() {
        let mut interp = interp();
        let h = interp.closure(identity, 1, &[]);
        let x = interp.thunk(seven, &[]);
        interp.new_args(&[h, x]);

        let r = interp.catch(h, x).unwrap();
        assert_eq!(interp.int_val(r), Some(7));
        assert!(interp.is_floating(r));
        assert!(!interp.is_live(h));
    }

    #[test]
    fn test_catch_of_plain_value() {
        let mut interp = interp();
        let h = interp.closure(identity, 1, &[]);
        let x = interp.int(3);
        interp.new_args(&[h, x]);
        let r = interp.catch(h, x).unwrap();
        assert_eq!(r, x);
        assert!(interp.is_floating(x));
    }

    #[test]
    fn test_unwind_releases_native_frames() {
        let mut interp = interp();
        let before = interp.shadow_depth();
        let kept = interp.string("rooted");
        let h = interp.closure(identity, 1, &[]);
        interp.new(h);

        let r = interp.catch_with(h, |interp| {
            interp.push_arg(kept);
            interp.push_arg(kept);
            let payload = interp.int(1);
            Err(interp.throw(payload))
        });
        assert_eq!(interp.int_val(r.unwrap()), Some(1));
        assert_eq!(interp.shadow_depth(), before);
        assert!(!interp.is_live(kept));
    }

    #[test]
    fn test_nested_catch_handler_rethrows() {
        let mut interp = interp();
        let outer = interp.closure(identity, 1, &[]);
        interp.new(outer);
        let r = interp.catch_with(outer, |interp| {
            let inner = interp.closure(boom, 1, &[]);
            interp.new(inner);
            interp.catch_with(inner, |interp| {
                let payload = interp.int(0);
                Err(interp.throw(payload))
            })
        });
        // The inner handler threw "boom", caught by the outer one
        let r = r.unwrap();
        assert_eq!(interp.string_val(r), Some("boom"));
        assert_eq!(interp.shadow_depth(), 0);
    }

    #[test]
    fn test_invoke_hands_back_payload() {
        let mut interp = interp();
        let res = interp.invoke(|interp| {
            let payload = interp.string("oops");
            Err(interp.throw(payload))
        });
        let payload = res.unwrap_err();
        assert_eq!(interp.refc(payload), 1);
        assert_eq!(interp.string_val(payload), Some("oops"));
        interp.free(payload);
    }

    #[test]
    fn test_pending_signal_delivered_at_safe_point() {
        let mut interp = interp();
        let h = interp.closure(identity, 1, &[]);
        let x = interp.thunk(seven, &[]);
        interp.new_args(&[h, x]);
        interp.raise(2);

        let r = interp.catch(h, x).unwrap();
        let (f, n) = interp.app_parts(r).unwrap();
        assert_eq!(interp.symbol_of(f), Some(interp.symtab().builtins().signal));
        assert_eq!(interp.int_val(n), Some(2));

        // Delivered once
        let x = interp.thunk(seven, &[]);
        interp.new(x);
        let h = interp.closure(identity, 1, &[]);
        interp.new(h);
        let r = interp.catch(h, x).unwrap();
        assert_eq!(interp.int_val(r), Some(7));
    }

    // Posts a signal after throwing, so it is pending while the handler is
    // entered.
    fn boom_then_signal(
        interp: &mut Interpreter,
        _args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let payload = interp.string("boom");
        let e = interp.throw(payload);
        interp.raise(2);
        Err(e)
    }

    // Records that it ran, then makes a call of its own.
    fn enter_then_call(
        interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let sym = interp.symbol_by_name("handler_entered");
        let yes = interp.int(1);
        interp.define(sym, yes).ok();
        let id = interp.closure(identity, 1, &[]);
        let r = interp.app(id, args[0])?;
        Ok(Outcome::Value(r))
    }

    #[test]
    fn test_break_mask_covers_handler_entry_only() {
        let mut interp = interp();
        let outer = interp.closure(identity, 1, &[]);
        interp.new(outer);

        let r = interp
            .catch_with(outer, |interp| {
                let h = interp.closure(enter_then_call, 1, &[]);
                let x = interp.thunk(boom_then_signal, &[]);
                interp.new_args(&[h, x]);
                interp.catch(h, x)
            })
            .unwrap();

        // The handler got in despite the pending signal...
        let sym = interp.symbol_by_name("handler_entered");
        let entered = interp.global_value(sym).and_then(|v| interp.int_val(v));
        assert_eq!(entered, Some(1));

        // ...and the signal fired at its next safe point
        let (f, n) = interp.app_parts(r).expect("signal payload");
        assert_eq!(interp.symbol_of(f), Some(interp.symtab().builtins().signal));
        assert_eq!(interp.int_val(n), Some(2));
        assert_eq!(interp.shadow_depth(), 0);
        assert!(!interp.brkmask);
    }

    #[test]
    fn test_stack_fault_wins_over_pending_signal() {
        let mut interp = interp();
        interp.reset_stack_base();
        interp.set_stack_max(1);
        interp.raise(2);

        let res = interp.invoke(|interp| {
            interp.check_all()?;
            Ok(interp.void())
        });
        let payload = res.unwrap_err();
        assert_eq!(
            interp.symbol_of(payload),
            Some(interp.symtab().builtins().stack_fault)
        );
        // The throw consumed the pending signal as well
        assert_eq!(interp.pending_signal, 0);
        interp.free(payload);

        interp.set_stack_max(0);
        assert!(interp.check_all().is_ok());
    }

    fn deep(
        interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        // Not a tail call: recurses on the native stack
        let n = interp.int_val(args[0]).unwrap_or(0);
        let me = interp.constant("deep");
        let next = interp.int(n + 1);
        let r = interp.app(me, next)?;
        Ok(Outcome::Value(r))
    }

    #[test]
    fn test_stack_fault_is_catchable() {
        let mut interp = Interpreter::with_config(RuntimeConfig::default().with_stack_max(64 * 1024));
        interp.reset_stack_base();
        interp.define_external("deep", 1, deep);
        let h = interp.closure(identity, 1, &[]);
        interp.new(h);

        let r = interp
            .catch_with(h, |interp| {
                let f = interp.constant("deep");
                let zero = interp.int(0);
                interp.app(f, zero)
            })
            .unwrap();
        assert_eq!(
            interp.symbol_of(r),
            Some(interp.symtab().builtins().stack_fault)
        );
        assert_eq!(interp.shadow_depth(), 0);
    }

    #[test]
    fn test_stack_guard_disabled_with_zero() {
        let mut interp = interp();
        interp.set_stack_max(0);
        assert!(interp.check_stack().is_ok());
        assert_eq!(interp.stack_max(), 0);
    }

    #[cfg(feature = "signals")]
    #[test]
    fn test_trap_installs_and_restores() {
        use super::{TrapAction, trap};
        assert!(trap(TrapAction::Ignore, libc::SIGUSR2).is_ok());
        assert!(trap(TrapAction::Default, libc::SIGUSR2).is_ok());
        assert!(trap(TrapAction::Catch, -1).is_err());
    }
}
