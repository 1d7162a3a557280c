// Calling convention and thunk forcing
//
// `apply(x, y)` walks the application spine of `x` to count the arguments
// already supplied. If `y` completes the call (count == arity) the native
// entry runs right away; otherwise a new application node records the
// partial application.
//
// A saturated call pushes one shadow-stack frame:
//
//   [marker, head, arg1 .. argn, env1 .. envm]
//
// so an exception unwinding past the entry can release everything. The
// frame is popped when the entry returns a value. When it returns a tail
// call instead, the operands of the tail call are pushed as a new frame, the
// finished frame below it is dropped (pop_tail_args), and the call proceeds
// in the same loop iteration. Tail-recursive programs therefore run in
// constant native and shadow stack space.

use crate::error::{Exception, fatal};
use crate::interpreter::Interpreter;
use crate::shadow_stack::Frame;
use crate::term::{EntryFn, Fun, Outcome, TermData, TermRef, ThunkCell};
use smallvec::SmallVec;

type Env = SmallVec<[TermRef; 4]>;

impl Interpreter {
    // Applies `x` to `y`. Both must be owned by the caller and both
    // references are consumed. The result is not owned by the caller.
    pub fn apply(&mut self, x: TermRef, y: TermRef) -> Result<TermRef, Exception> {
        let (mut x, mut y) = (x, y);
        loop {
            self.expect_owned(x, "apply");
            self.expect_owned(y, "apply");

            // A thunk in function position is evaluated first.
            if self.is_thunk(x) {
                if let Err(e) = self.force(x) {
                    self.free(x);
                    self.free(y);
                    return Err(e);
                }
            }

            let Some((head, entry, env, args)) = self.saturated_call(x, y) else {
                return Ok(self.heap.alloc(TermData::App(x, y)));
            };

            // The frame takes over y's reference; everything else gets a
            // fresh one before the spine is released.
            self.new(head);
            for &a in &args[..args.len() - 1] {
                self.new(a);
            }
            self.new_vect(&env);
            self.free(x);

            let mut frame = Frame::new();
            frame.push(head);
            frame.extend_from_slice(&args);
            frame.extend_from_slice(&env);
            self.push_frame_owned(&frame);

            self.check_all()?;
            log::trace!("apply: calling {:?} with {} args", head, args.len());
            match entry(self, &args, &env)? {
                Outcome::Value(r) => {
                    self.pop_args(Some(r));
                    return Ok(r);
                }
                Outcome::TailCall(f, targs) => {
                    let tail = self.enter_tail_call(f, &targs);
                    let mut rest = tail.into_iter();
                    let Some(g) = rest.next() else {
                        fatal(format_args!("apply: empty tail call frame"));
                    };
                    let rest: Frame = rest.collect();
                    let Some((&last, init)) = rest.split_last() else {
                        // No arguments: the function itself is the result.
                        self.unref(g);
                        return Ok(g);
                    };
                    let mut g = g;
                    for (i, &a) in init.iter().enumerate() {
                        match self.apply(g, a) {
                            Ok(r) => g = self.new(r),
                            Err(e) => {
                                self.free_vect(&init[i + 1..]);
                                self.free(last);
                                return Err(e);
                            }
                        }
                    }
                    x = g;
                    y = last;
                }
            }
        }
    }

    // Decides whether `x y` is a complete call. Returns the function, its
    // entry point, its environment and all arguments in order.
    fn saturated_call(
        &self,
        x: TermRef,
        y: TermRef,
    ) -> Option<(TermRef, EntryFn, Env, Frame)> {
        let mut n = 1;
        let mut f = self.resolve(x);
        while let TermData::App(g, _) = self.heap.data(f) {
            f = self.resolve(*g);
            n += 1;
        }
        let TermData::Fun(Fun {
            closure: Some(clos),
            ..
        }) = self.heap.data(f)
        else {
            return None;
        };
        if clos.arity != n {
            return None;
        }
        let entry = clos.entry;
        let env: Env = clos.env.iter().copied().collect();

        let mut args = Frame::new();
        args.push(y);
        let mut g = self.resolve(x);
        while let TermData::App(h, a) = self.heap.data(g) {
            args.push(*a);
            g = self.resolve(*h);
        }
        args.reverse();
        Some((f, entry, env, args))
    }

    // Roots the operands of a tail call, drops the caller's frame beneath
    // them, and hands their references to the caller.
    fn enter_tail_call(&mut self, f: TermRef, args: &[TermRef]) -> Frame {
        let mut operands = Frame::new();
        operands.push(f);
        operands.extend_from_slice(args);
        self.push_args(&operands);
        self.pop_tail_args(None);
        self.take_frame()
    }

    // Finishes a call whose frame is on top of the shadow stack.
    fn settle(&mut self, outcome: Outcome) -> Result<TermRef, Exception> {
        match outcome {
            Outcome::Value(r) => {
                self.pop_args(Some(r));
                Ok(r)
            }
            Outcome::TailCall(f, args) => {
                let operands = self.enter_tail_call(f, &args);
                self.apply_operands(&operands)
            }
        }
    }

    // Applies owned operands `f a1 .. an` left to right.
    fn apply_operands(&mut self, operands: &[TermRef]) -> Result<TermRef, Exception> {
        let Some((&f, args)) = operands.split_first() else {
            fatal(format_args!("apply_operands: nothing to apply"));
        };
        let mut g = f;
        for (i, &a) in args.iter().enumerate() {
            match self.apply(g, a) {
                Ok(r) => g = self.new(r),
                Err(e) => {
                    self.free_vect(&args[i + 1..]);
                    return Err(e);
                }
            }
        }
        self.unref(g);
        Ok(g)
    }

    // Like `apply`, but takes its own references, so fresh or borrowed
    // terms can be passed directly.
    pub fn app(&mut self, f: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.new(f);
        self.new(x);
        self.apply(f, x)
    }

    // f x1 ... xn
    pub fn appl(&mut self, f: TermRef, xs: &[TermRef]) -> Result<TermRef, Exception> {
        let mut g = f;
        for &x in xs {
            g = self.app(g, x)?;
        }
        Ok(g)
    }

    // Evaluates a thunk. The first call runs the computation and stores its
    // value in the thunk's cell; later calls return the stored value. If the
    // computation yields another thunk, that one is forced as well. Terms
    // that are not thunks are returned unchanged.
    pub fn force(&mut self, x: TermRef) -> Result<TermRef, Exception> {
        let (entry, env) = match self.heap.data(x) {
            TermData::Thunk(ThunkCell::Pending(clos)) => {
                (clos.entry, clos.env.iter().copied().collect::<Env>())
            }
            TermData::Thunk(ThunkCell::Forced(_)) => return Ok(self.resolve(x)),
            _ => return Ok(x),
        };
        self.expect_owned(x, "force");
        log::trace!("force: evaluating thunk {:?}", x);

        self.push_args(&env);
        self.check_all()?;
        let outcome = entry(self, &[], &env)?;
        let mut v = self.settle(outcome)?;
        self.new(v);

        while self.is_thunk(v) {
            match self.force(v) {
                Ok(w) => {
                    self.new(w);
                    self.free(v);
                    v = w;
                }
                Err(e) => {
                    self.free(v);
                    return Err(e);
                }
            }
        }
        let w = self.resolve(v);
        if w != v {
            self.new(w);
            self.free(v);
            v = w;
        }

        // The thunk may have been forced re-entrantly while we were busy;
        // the first value published wins.
        if self.is_forced(x) {
            self.free(v);
            return Ok(self.resolve(x));
        }
        let old = core::mem::replace(
            self.heap.data_mut(x),
            TermData::Thunk(ThunkCell::Forced(v)),
        );
        if let TermData::Thunk(ThunkCell::Pending(clos)) = old {
            self.free_vect(&clos.env);
        }
        Ok(v)
    }

    // Runs a parameterless function. Other terms are returned unchanged.
    pub fn call(&mut self, x: TermRef) -> Result<TermRef, Exception> {
        let x = self.resolve(x);
        let (entry, env) = match self.heap.data(x) {
            TermData::Fun(Fun {
                closure: Some(clos),
                ..
            }) if clos.arity == 0 => (clos.entry, clos.env.iter().copied().collect::<Env>()),
            _ => return Ok(x),
        };
        let mut frame = Frame::new();
        frame.push(x);
        frame.extend_from_slice(&env);
        self.push_args(&frame);
        self.check_all()?;
        let outcome = entry(self, &[], &env)?;
        self.settle(outcome)
    }

    pub(crate) fn expect_owned(&self, x: TermRef, what: &str) {
        if self.heap.refc(x) == 0 {
            fatal(format_args!("{}: unreferenced term {:?}", what, x));
        }
    }
}
