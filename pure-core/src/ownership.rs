// Reference counting and release
//
// Ownership protocol:
// - a fresh term has count 0 and floats on the tmps list
// - `new` takes a reference (and unlinks the term from tmps)
// - `free` drops a reference; at zero the term is released
// - `freenew` releases a term only if nobody ever took a reference
// - `ref_`/`unref` adjust the count without releasing; a term whose count
//   drops to zero through `unref` floats again
//
// Release never recurses on the native stack. Children are pushed onto an
// explicit work list and the parent slot is recycled only after all of its
// children have been dealt with.

use crate::error::fatal;
use crate::interpreter::Interpreter;
use crate::matrix::MatrixData;
use crate::term::{Fun, TermData, TermRef, ThunkCell};
use std::rc::Rc;

pub(crate) const MAX_SWEEP_PASSES: usize = 16;

enum Work {
    // Drop one reference; release the term at zero.
    Drop(TermRef),
    // All children handled; hand the slot back to the heap.
    Recycle(TermRef),
}

impl Interpreter {
    pub fn new(&mut self, x: TermRef) -> TermRef {
        let slot = self.heap.slot_mut(x);
        slot.refc = match slot.refc.checked_add(1) {
            Some(n) => n,
            None => fatal(format_args!("reference count overflow on {:?}", x)),
        };
        if slot.refc == 1 {
            self.heap.sink(x.index());
        }
        x
    }

    pub fn free(&mut self, x: TermRef) {
        self.release(x);
    }

    pub fn freenew(&mut self, x: TermRef) {
        if self.heap.refc(x) == 0 {
            let x = self.new(x);
            self.release(x);
        }
    }

    pub fn ref_(&mut self, x: TermRef) {
        self.new(x);
    }

    pub fn unref(&mut self, x: TermRef) {
        let slot = self.heap.slot_mut(x);
        if slot.refc == 0 {
            fatal(format_args!("unref: unreferenced term {:?}", x));
        }
        slot.refc -= 1;
        if slot.refc == 0 {
            self.heap.float(x.index());
        }
    }

    // Takes a reference to each term.
    pub fn new_args(&mut self, xs: &[TermRef]) {
        for &x in xs {
            self.new(x);
        }
    }

    // Drops a reference to each term while keeping `ret` alive. `ret` ends up
    // floating if its only owners were among `xs`.
    pub fn free_args(&mut self, ret: Option<TermRef>, xs: &[TermRef]) {
        if let Some(r) = ret {
            self.ref_(r);
        }
        for &x in xs {
            self.free(x);
        }
        if let Some(r) = ret {
            self.unref(r);
        }
    }

    // Bulk `new` over a vector of terms, skipping null placeholders. The tmps
    // list is doubly linked, so the update order does not matter.
    pub fn new_vect(&mut self, xs: &[TermRef]) {
        for &x in xs {
            if !x.is_null() {
                self.new(x);
            }
        }
    }

    pub fn free_vect(&mut self, xs: &[TermRef]) {
        for &x in xs {
            if !x.is_null() {
                self.free(x);
            }
        }
    }

    /// Releases every term still floating on the tmps list. Meant for the
    /// embedding layer between top-level evaluations.
    ///
    /// Finalizers may float new temporaries while a pass runs; those are
    /// picked up by later passes, up to `MAX_SWEEP_PASSES`.
    pub fn sweep_tmps(&mut self) -> usize {
        let mut swept = 0;
        for _ in 0..MAX_SWEEP_PASSES {
            let mut freed = 0;
            for t in self.heap.tmps() {
                if self.heap.is_live(t) && self.heap.refc(t) == 0 {
                    self.freenew(t);
                    freed += 1;
                }
            }
            swept += freed;
            if freed == 0 {
                break;
            }
        }
        if swept > 0 {
            log::trace!("swept {} temporaries", swept);
        }
        let left = self.heap.tmps_len();
        if left > 0 {
            log::debug!("sweep gave up with {} temporaries still floating", left);
        }
        swept
    }

    // Attaches (or with None, removes) a finalizer. Only applications and
    // pointers accept one; returns None otherwise.
    pub fn set_sentry(&mut self, sentry: Option<TermRef>, x: TermRef) -> Option<TermRef> {
        if !self.heap.data(x).accepts_sentry() {
            return None;
        }
        if let Some(s) = sentry {
            self.new(s);
        }
        let old = core::mem::replace(&mut self.heap.slot_mut(x).sentry, sentry);
        if let Some(old) = old {
            self.free(old);
        }
        Some(x)
    }

    pub fn sentry(&self, x: TermRef) -> Option<TermRef> {
        self.heap.slot(x).sentry
    }

    pub fn clear_sentry(&mut self, x: TermRef) -> Option<TermRef> {
        self.set_sentry(None, x)
    }

    fn release(&mut self, x: TermRef) {
        let mut work = vec![Work::Drop(x)];
        while let Some(item) = work.pop() {
            match item {
                Work::Drop(x) => {
                    let slot = self.heap.slot_mut(x);
                    if slot.refc == 0 {
                        fatal(format_args!("free: unreferenced term {:?}", x));
                    }
                    slot.refc -= 1;
                    if slot.refc > 0 {
                        continue;
                    }
                    self.call_sentry(x);
                    if self.heap.refc(x) > 0 {
                        log::warn!("finalizer resurrected {:?}; not collecting it", x);
                        continue;
                    }
                    work.push(Work::Recycle(x));
                    self.push_children(x, &mut work);
                }
                Work::Recycle(x) => {
                    // Dropping the data releases any shared matrix block.
                    drop(self.heap.recycle(x));
                }
            }
        }
    }

    // Pushes the owned children of `x`. The function part of an application
    // goes last so it is handled first, keeping the list spine pending for
    // as short as possible.
    fn push_children(&self, x: TermRef, work: &mut Vec<Work>) {
        let slot = self.heap.slot(x);
        if let Some(s) = slot.sentry {
            work.push(Work::Drop(s));
        }
        match &slot.data {
            TermData::App(f, a) => {
                work.push(Work::Drop(*a));
                work.push(Work::Drop(*f));
            }
            TermData::Fun(Fun {
                closure: Some(clos),
                ..
            })
            | TermData::Thunk(ThunkCell::Pending(clos)) => {
                work.extend(clos.env.iter().map(|&e| Work::Drop(e)));
            }
            TermData::Thunk(ThunkCell::Forced(v)) => work.push(Work::Drop(*v)),
            TermData::Matrix(m) => {
                if let MatrixData::Boxed(block) = &m.data {
                    // Elements belong to the block; only its last header
                    // releases them.
                    if Rc::strong_count(block) == 1 {
                        work.extend(
                            block
                                .borrow()
                                .iter()
                                .filter(|e| !e.is_null())
                                .map(|&e| Work::Drop(e)),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    // Runs the finalizer of a term that just lost its last reference. The
    // term is kept alive for the duration of the call. Exceptions raised by
    // the finalizer are logged and discarded.
    fn call_sentry(&mut self, x: TermRef) {
        let Some(s) = self.heap.slot(x).sentry else {
            return;
        };
        self.heap.slot_mut(x).refc += 1;
        match self.invoke(|interp| interp.app(s, x)) {
            Ok(r) => self.freenew(r),
            Err(payload) => {
                log::warn!(
                    "exception in finalizer of {:?}: {}",
                    x,
                    self.render(payload)
                );
                self.free(payload);
            }
        }
        self.heap.slot_mut(x).refc -= 1;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::interpreter::Interpreter;
    use crate::term::{Outcome, TermRef};
    use crate::error::Exception;

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    #[test]
    fn test_new_free_cycle() {
        let mut interp = interp();
        let x = interp.int(7);
        assert!(interp.is_floating(x));

        interp.new(x);
        assert_eq!(interp.refc(x), 1);
        assert!(!interp.is_floating(x));

        interp.free(x);
        assert!(!interp.is_live(x));
        assert_eq!(interp.heap_stats().live, 0);
    }

    #[test]
    fn test_shared_term_survives_one_release() {
        let mut interp = interp();
        let x = interp.string("shared");
        interp.new(x);
        interp.new(x);
        interp.free(x);
        assert!(interp.is_live(x));
        assert_eq!(interp.string_val(x).as_deref(), Some("shared"));
        interp.free(x);
        assert!(!interp.is_live(x));
    }

    #[test]
    fn test_freenew_only_collects_fresh_terms() {
        let mut interp = interp();
        let fresh = interp.int(1);
        let owned = interp.int(2);
        interp.new(owned);

        interp.freenew(fresh);
        interp.freenew(owned);

        assert!(!interp.is_live(fresh));
        assert!(interp.is_live(owned));
    }

    #[test]
    fn test_unref_refloats() {
        let mut interp = interp();
        let x = interp.double(1.5);
        interp.ref_(x);
        assert!(!interp.is_floating(x));
        interp.unref(x);
        assert!(interp.is_live(x));
        assert!(interp.is_floating(x));
    }

    #[test]
    fn test_application_children_released() {
        let mut interp = interp();
        let f = interp.int(1);
        let a = interp.int(2);
        let app = interp.app_node(f, a);
        interp.new(app);
        interp.free(app);
        assert!(!interp.is_live(f));
        assert!(!interp.is_live(a));
        assert_eq!(interp.heap_stats().live, 0);
    }

    #[test]
    #[should_panic(expected = "fatal runtime error")]
    fn test_double_free_is_fatal() {
        let mut interp = interp();
        let x = interp.int(3);
        interp.new(x);
        interp.free(x);
        interp.free(x);
    }

    #[test]
    #[should_panic(expected = "unref: unreferenced term")]
    fn test_unref_underflow_is_fatal() {
        let mut interp = interp();
        let x = interp.int(3);
        interp.unref(x);
    }

    #[test]
    fn test_free_args_protects_result() {
        let mut interp = interp();
        let a = interp.int(1);
        let b = interp.int(2);
        interp.new_args(&[a, b]);
        interp.free_args(Some(a), &[a, b]);
        assert!(interp.is_live(a));
        assert!(interp.is_floating(a));
        assert!(!interp.is_live(b));
    }

    fn count_finalizer(
        interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let counter = interp.symbol_by_name("finalized");
        let n = interp.global_value(counter).and_then(|t| interp.int_val(t)).unwrap_or(0);
        let next = interp.int(n + 1);
        interp.define(counter, next).ok();
        Ok(Outcome::Value(args[0]))
    }

    #[test]
    fn test_sentry_runs_once_on_release() {
        let mut interp = interp();
        let counter = interp.symbol_by_name("finalized");
        let fin = interp.closure(count_finalizer, 1, &[]);

        let p = interp.pointer(0xdead);
        assert_eq!(interp.set_sentry(Some(fin), p), Some(p));
        assert_eq!(interp.sentry(p), Some(fin));
        interp.new(p);
        interp.free(p);

        assert!(!interp.is_live(p));
        let n = interp.global_value(counter).and_then(|t| interp.int_val(t));
        assert_eq!(n, Some(1));
        assert!(!interp.is_live(fin));
    }

    fn throwing_finalizer(
        interp: &mut Interpreter,
        _args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let counter = interp.symbol_by_name("throwing_runs");
        let n = interp.global_value(counter).and_then(|t| interp.int_val(t)).unwrap_or(0);
        let next = interp.int(n + 1);
        interp.define(counter, next).ok();
        let payload = interp.string("finalizer failed");
        Err(interp.throw(payload))
    }

    #[test]
    fn test_throwing_sentry_does_not_stop_release() {
        let mut interp = interp();
        let counter = interp.symbol_by_name("throwing_runs");
        let zero = interp.int(0);
        interp.define(counter, zero).unwrap();
        let g = interp.constant("g");
        let baseline = interp.heap_stats().live;

        let fin = interp.closure(throwing_finalizer, 1, &[]);
        let arg = interp.int(1);
        let x = interp.app_node(g, arg);
        assert_eq!(interp.set_sentry(Some(fin), x), Some(x));
        interp.new(x);
        interp.free(x);

        assert!(!interp.is_live(x));
        assert!(!interp.is_live(arg));
        assert!(!interp.is_live(fin));
        let runs = interp.global_value(counter).and_then(|t| interp.int_val(t));
        assert_eq!(runs, Some(1));
        assert_eq!(
            interp.heap_stats().live,
            baseline,
            "the discarded payload and the call frame should be released"
        );
        assert_eq!(interp.shadow_depth(), 0);
        assert_eq!(interp.catch_depth(), 0);
    }

    // Every release floats a fresh pointer carrying the same finalizer.
    fn breed(
        interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let fin = interp.sentry(args[0]);
        let p = interp.pointer(0);
        interp.set_sentry(fin, p);
        Ok(Outcome::Value(interp.void()))
    }

    #[test]
    fn test_sweep_gives_up_on_endless_finalizers() {
        let mut interp = interp();
        let fin = interp.closure(breed, 1, &[]);
        let p = interp.pointer(0);
        interp.set_sentry(Some(fin), p);

        assert_eq!(interp.sweep_tmps(), super::MAX_SWEEP_PASSES);
        assert_eq!(interp.heap_stats().floating, 1);

        let last = interp.tmps()[0];
        interp.clear_sentry(last);
        assert_eq!(interp.sweep_tmps(), 1);
        assert_eq!(interp.heap_stats().floating, 0);
        assert!(!interp.is_live(fin));
    }

    #[test]
    fn test_sentry_rejected_on_scalars() {
        let mut interp = interp();
        let fin = interp.closure(count_finalizer, 1, &[]);
        let x = interp.int(5);
        assert_eq!(interp.set_sentry(Some(fin), x), None);
        interp.freenew(fin);
        assert!(!interp.is_live(fin));
    }
}
