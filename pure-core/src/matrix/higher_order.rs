// Higher-order operations over matrix elements
//
// Elements are visited in row-major order. Operations producing a matrix
// speculate on the kind of the callback's results (see buffer.rs). The
// function and matrix arguments are pinned for the duration of the
// operation, so fresh terms can be passed and stay valid across callbacks.
// A matrix argument that is not a matrix raises `failed_match`; a predicate
// result that is not an integer raises `failed_cond`.

use super::{Elem, KindBuffer, Matrix};
use crate::error::Exception;
use crate::interpreter::Interpreter;
use crate::term::TermRef;
use smallvec::SmallVec;

impl Interpreter {
    // Runs `body` with `pins` kept alive.
    fn pinned<R>(
        &mut self,
        pins: &[TermRef],
        body: impl FnOnce(&mut Self) -> Result<R, Exception>,
    ) -> Result<R, Exception> {
        for &p in pins {
            self.ref_(p);
        }
        let res = body(self);
        for &p in pins {
            self.unref(p);
        }
        res
    }

    fn matrix_arg(&mut self, x: TermRef) -> Result<Matrix, Exception> {
        match self.matrix(x) {
            Some(m) => Ok(m.clone()),
            None => Err(self.failed_match()),
        }
    }

    // f e1 ... en
    fn call_elems(&mut self, f: TermRef, es: &[Elem]) -> Result<TermRef, Exception> {
        let args: SmallVec<[TermRef; 3]> = es.iter().map(|&e| self.elem_term(e)).collect();
        self.appl(f, &args)
    }

    // Truth value of `p e`.
    fn test_elem(&mut self, p: TermRef, e: Elem) -> Result<bool, Exception> {
        let r = self.call_elems(p, &[e])?;
        let v = self.int_val(r);
        self.freenew(r);
        match v {
            Some(n) => Ok(n != 0),
            None => Err(self.failed_cond()),
        }
    }

    // Results of `f` on each argument tuple, as a rows x cols matrix.
    fn collect_calls(
        &mut self,
        f: TermRef,
        argv: &[SmallVec<[Elem; 3]>],
        rows: usize,
        cols: usize,
    ) -> Result<TermRef, Exception> {
        let mut out = KindBuffer::new(argv.len());
        for args in argv {
            match self.call_elems(f, args) {
                Ok(r) => out.push_term(self, r),
                Err(e) => {
                    out.discard(self);
                    return Err(e);
                }
            }
        }
        Ok(out.finish(self, rows, cols))
    }

    // Threads an accumulator through `step`. The accumulator is owned while
    // the fold runs; the final one is handed back unowned.
    fn fold_with(
        &mut self,
        acc: TermRef,
        elems: impl IntoIterator<Item = Elem>,
        mut step: impl FnMut(&mut Self, TermRef, Elem) -> Result<TermRef, Exception>,
    ) -> Result<TermRef, Exception> {
        let mut acc = self.new(acc);
        for e in elems {
            match step(self, acc, e) {
                Ok(r) => {
                    self.new(r);
                    self.free(acc);
                    acc = r;
                }
                Err(err) => {
                    self.free(acc);
                    return Err(err);
                }
            }
        }
        self.unref(acc);
        Ok(acc)
    }

    // Like `fold_with`, but collects every accumulator (the initial one
    // included) into a row vector. `reversed` scans right to left.
    fn scan_with(
        &mut self,
        acc: TermRef,
        elems: Vec<Elem>,
        reversed: bool,
        mut step: impl FnMut(&mut Self, TermRef, Elem) -> Result<TermRef, Exception>,
    ) -> Result<TermRef, Exception> {
        let mut out = KindBuffer::new(elems.len() + 1);
        let mut acc = self.new(acc);
        out.push_term(self, acc);
        let order: Box<dyn Iterator<Item = Elem>> = if reversed {
            Box::new(elems.into_iter().rev())
        } else {
            Box::new(elems.into_iter())
        };
        for e in order {
            match step(self, acc, e) {
                Ok(r) => {
                    self.new(r);
                    out.push_term(self, r);
                    self.free(acc);
                    acc = r;
                }
                Err(err) => {
                    self.free(acc);
                    out.discard(self);
                    return Err(err);
                }
            }
        }
        self.free(acc);
        if reversed {
            out.reverse();
        }
        Ok(out.finish_row(self))
    }

    /// Applies `f` to every element for its effect. Returns `()`.
    pub fn matrix_do(&mut self, f: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            for e in m.elems() {
                let r = interp.call_elems(f, &[e])?;
                interp.freenew(r);
            }
            Ok(interp.void())
        })
    }

    /// `f` applied to each element, in a matrix of the same shape. An empty
    /// matrix maps to an empty boxed matrix.
    pub fn matrix_map(&mut self, f: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let argv: Vec<_> = m.elems().into_iter().map(|e| SmallVec::from_slice(&[e])).collect();
            interp.collect_calls(f, &argv, m.rows(), m.cols())
        })
    }

    /// Pairwise `f`; the result has the smaller of each dimension.
    pub fn matrix_zipwith(&mut self, f: TermRef, x: TermRef, y: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x, y], |interp| {
            let mx = interp.matrix_arg(x)?;
            let my = interp.matrix_arg(y)?;
            let rows = mx.rows().min(my.rows());
            let cols = mx.cols().min(my.cols());
            let mut argv = Vec::with_capacity(rows * cols);
            for i in 0..rows {
                for j in 0..cols {
                    argv.push(SmallVec::from_slice(&[mx.elem(i, j), my.elem(i, j)]));
                }
            }
            interp.collect_calls(f, &argv, rows, cols)
        })
    }

    pub fn matrix_zipwith3(
        &mut self,
        f: TermRef,
        x: TermRef,
        y: TermRef,
        z: TermRef,
    ) -> Result<TermRef, Exception> {
        self.pinned(&[f, x, y, z], |interp| {
            let mx = interp.matrix_arg(x)?;
            let my = interp.matrix_arg(y)?;
            let mz = interp.matrix_arg(z)?;
            let rows = mx.rows().min(my.rows()).min(mz.rows());
            let cols = mx.cols().min(my.cols()).min(mz.cols());
            let mut argv = Vec::with_capacity(rows * cols);
            for i in 0..rows {
                for j in 0..cols {
                    argv.push(SmallVec::from_slice(&[
                        mx.elem(i, j),
                        my.elem(i, j),
                        mz.elem(i, j),
                    ]));
                }
            }
            interp.collect_calls(f, &argv, rows, cols)
        })
    }

    // f (... (f (f z x1) x2) ...) xn
    pub fn matrix_foldl(&mut self, f: TermRef, z: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            interp.fold_with(z, m.elems(), |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[acc, t])
            })
        })
    }

    // f x1 (f x2 (... (f xn z) ...))
    pub fn matrix_foldr(&mut self, f: TermRef, z: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            interp.fold_with(z, m.elems().into_iter().rev(), |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[t, acc])
            })
        })
    }

    /// `foldl` seeded with the first element. `None` for an empty matrix.
    pub fn matrix_foldl1(&mut self, f: TermRef, x: TermRef) -> Result<Option<TermRef>, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let mut elems = m.elems().into_iter();
            let Some(first) = elems.next() else {
                return Ok(None);
            };
            let z = interp.elem_term(first);
            interp
                .fold_with(z, elems, |interp, acc, e| {
                    let t = interp.elem_term(e);
                    interp.appl(f, &[acc, t])
                })
                .map(Some)
        })
    }

    pub fn matrix_foldr1(&mut self, f: TermRef, x: TermRef) -> Result<Option<TermRef>, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let mut elems = m.elems().into_iter().rev();
            let Some(last) = elems.next() else {
                return Ok(None);
            };
            let z = interp.elem_term(last);
            interp
                .fold_with(z, elems, |interp, acc, e| {
                    let t = interp.elem_term(e);
                    interp.appl(f, &[t, acc])
                })
                .map(Some)
        })
    }

    /// Row vector of all intermediate `foldl` results, starting with `z`.
    pub fn matrix_scanl(&mut self, f: TermRef, z: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            interp.scan_with(z, m.elems(), false, |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[acc, t])
            })
        })
    }

    pub fn matrix_scanl1(&mut self, f: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let mut elems = m.elems();
            if elems.is_empty() {
                return Ok(KindBuffer::new(0).finish_row(interp));
            }
            let first = elems.remove(0);
            let z = interp.elem_term(first);
            interp.scan_with(z, elems, false, |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[acc, t])
            })
        })
    }

    /// Row vector of all intermediate `foldr` results, ending with `z`.
    pub fn matrix_scanr(&mut self, f: TermRef, z: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            interp.scan_with(z, m.elems(), true, |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[t, acc])
            })
        })
    }

    pub fn matrix_scanr1(&mut self, f: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.pinned(&[f, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let mut elems = m.elems();
            let Some(last) = elems.pop() else {
                return Ok(KindBuffer::new(0).finish_row(interp));
            };
            let z = interp.elem_term(last);
            interp.scan_with(z, elems, true, |interp, acc, e| {
                let t = interp.elem_term(e);
                interp.appl(f, &[t, acc])
            })
        })
    }

    /// Elements satisfying `p`, as a row vector of the same kind.
    pub fn matrix_filter(&mut self, p: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.select(p, x, |keep| if keep { Pick::Take } else { Pick::Skip })
    }

    /// Longest prefix satisfying `p`.
    pub fn matrix_takewhile(&mut self, p: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.select(p, x, |keep| if keep { Pick::Take } else { Pick::Stop })
    }

    /// What remains after the longest prefix satisfying `p`.
    pub fn matrix_dropwhile(&mut self, p: TermRef, x: TermRef) -> Result<TermRef, Exception> {
        self.select(p, x, |keep| if keep { Pick::Skip } else { Pick::TakeRest })
    }

    fn select(
        &mut self,
        p: TermRef,
        x: TermRef,
        pick: impl Fn(bool) -> Pick,
    ) -> Result<TermRef, Exception> {
        self.pinned(&[p, x], |interp| {
            let m = interp.matrix_arg(x)?;
            let elems = m.elems();
            let mut out = KindBuffer::with_kind(m.kind(), elems.len());
            let mut rest = false;
            for e in elems {
                let choice = if rest {
                    Pick::Take
                } else {
                    match interp.test_elem(p, e) {
                        Ok(keep) => pick(keep),
                        Err(err) => {
                            out.discard(interp);
                            return Err(err);
                        }
                    }
                };
                match choice {
                    Pick::Take => out.push_elem(interp, e),
                    Pick::Skip => {}
                    Pick::Stop => break,
                    Pick::TakeRest => {
                        rest = true;
                        out.push_elem(interp, e);
                    }
                }
            }
            Ok(out.finish_row(interp))
        })
    }

    /// Whether every element satisfies `p`. Stops at the first that does not.
    pub fn matrix_all(&mut self, p: TermRef, x: TermRef) -> Result<bool, Exception> {
        self.pinned(&[p, x], |interp| {
            let m = interp.matrix_arg(x)?;
            for e in m.elems() {
                if !interp.test_elem(p, e)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    pub fn matrix_any(&mut self, p: TermRef, x: TermRef) -> Result<bool, Exception> {
        self.pinned(&[p, x], |interp| {
            let m = interp.matrix_arg(x)?;
            for e in m.elems() {
                if interp.test_elem(p, e)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }
}

#[derive(Clone, Copy)]
enum Pick {
    Take,
    Skip,
    Stop,
    // Take this element and all that follow without testing them.
    TakeRest,
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::error::Exception;
    use crate::interpreter::Interpreter;
    use crate::matrix::MatrixKind;
    use crate::term::{Outcome, TermRef};
    use std::cell::Cell;

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    thread_local! {
        static CALLS: Cell<usize> = const { Cell::new(0) };
    }

    fn num(interp: &Interpreter, x: TermRef) -> f64 {
        interp.dbl_val(x).unwrap_or(0.0)
    }

    fn double_it(interp: &mut Interpreter, args: &[TermRef], _: &[TermRef]) -> Result<Outcome, Exception> {
        let r = match interp.int_val(args[0]) {
            Some(n) => interp.int(2 * n),
            None => interp.double(2.0 * num(interp, args[0])),
        };
        Ok(Outcome::Value(r))
    }

    // Ints below 3 stay ints, the rest become doubles.
    fn mixed(interp: &mut Interpreter, args: &[TermRef], _: &[TermRef]) -> Result<Outcome, Exception> {
        CALLS.with(|c| c.set(c.get() + 1));
        let n = interp.int_val(args[0]).unwrap_or(0);
        let r = if n < 3 {
            interp.int(n)
        } else {
            interp.double(f64::from(n))
        };
        Ok(Outcome::Value(r))
    }

    fn add(interp: &mut Interpreter, args: &[TermRef], _: &[TermRef]) -> Result<Outcome, Exception> {
        let s: i32 = args.iter().map(|&a| interp.int_val(a).unwrap_or(0)).sum();
        Ok(Outcome::Value(interp.int(s)))
    }

    fn minus(interp: &mut Interpreter, args: &[TermRef], _: &[TermRef]) -> Result<Outcome, Exception> {
        let a = interp.int_val(args[0]).unwrap_or(0);
        let b = interp.int_val(args[1]).unwrap_or(0);
        Ok(Outcome::Value(interp.int(a - b)))
    }

    fn positive(interp: &mut Interpreter, args: &[TermRef], _: &[TermRef]) -> Result<Outcome, Exception> {
        let yes = num(interp, args[0]) > 0.0;
        Ok(Outcome::Value(interp.int(i32::from(yes))))
    }

    fn not_a_truth_value(
        interp: &mut Interpreter,
        _: &[TermRef],
        _: &[TermRef],
    ) -> Result<Outcome, Exception> {
        Ok(Outcome::Value(interp.string("maybe")))
    }

    #[test]
    fn test_map_keeps_numeric_kind() {
        let mut interp = interp();
        let f = interp.closure(double_it, 1, &[]);
        let x = interp.real_matrix(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = interp.matrix_map(f, x).unwrap();
        assert_eq!(interp.matrix_kind(y), Some(MatrixKind::Real));
        assert_eq!(interp.render(y), "{2.0,4.0;6.0,8.0}");
        // The fresh arguments survive the operation
        assert!(interp.is_live(f));
        assert!(interp.is_live(x));
    }

    #[test]
    fn test_map_falls_back_to_boxed_without_recomputing() {
        let mut interp = interp();
        let f = interp.closure(mixed, 1, &[]);
        let x = interp.int_matrix(1, 4, &[1, 2, 3, 4]).unwrap();
        CALLS.with(|c| c.set(0));
        let y = interp.matrix_map(f, x).unwrap();
        assert_eq!(CALLS.with(Cell::get), 4);
        assert_eq!(interp.matrix_kind(y), Some(MatrixKind::Boxed));
        assert_eq!(interp.render(y), "{1,2,3.0,4.0}");
    }

    #[test]
    fn test_map_of_empty_matrix_is_boxed() {
        let mut interp = interp();
        let f = interp.closure(double_it, 1, &[]);
        let x = interp.matrix_new(MatrixKind::Real, 0, 3);
        let y = interp.matrix_map(f, x).unwrap();
        assert_eq!(interp.matrix_kind(y), Some(MatrixKind::Boxed));
        assert_eq!(interp.matrix_dim(y), Ok((0, 3)));
    }

    #[test]
    fn test_zipwith_uses_smaller_dimensions() {
        let mut interp = interp();
        let f = interp.closure(add, 2, &[]);
        let x = interp.int_matrix(1, 3, &[1, 2, 3]).unwrap();
        let y = interp.int_matrix(2, 2, &[10, 20, 30, 40]).unwrap();
        let z = interp.matrix_zipwith(f, x, y).unwrap();
        assert_eq!(interp.render(z), "{11,22}");

        let g = interp.closure(add, 3, &[]);
        let w = interp.matrix_zipwith3(g, x, y, x).unwrap();
        assert_eq!(interp.render(w), "{12,24}");
    }

    #[test]
    fn test_folds_respect_direction() {
        let mut interp = interp();
        let f = interp.closure(minus, 2, &[]);
        let x = interp.int_matrix(1, 3, &[1, 2, 3]).unwrap();
        let zero = interp.int(0);
        let l = interp.matrix_foldl(f, zero, x).unwrap();
        assert_eq!(interp.int_val(l), Some(-6));
        let zero = interp.int(0);
        let r = interp.matrix_foldr(f, zero, x).unwrap();
        assert_eq!(interp.int_val(r), Some(2));

        let l1 = interp.matrix_foldl1(f, x).unwrap().unwrap();
        assert_eq!(interp.int_val(l1), Some(-4));
        let r1 = interp.matrix_foldr1(f, x).unwrap().unwrap();
        assert_eq!(interp.int_val(r1), Some(2));

        let empty = interp.matrix_new(MatrixKind::Int, 0, 0);
        assert_eq!(interp.matrix_foldl1(f, empty).unwrap(), None);
        let z = interp.string("z");
        let same = interp.matrix_foldl(f, z, empty).unwrap();
        assert_eq!(same, z);
        assert!(interp.is_floating(z));
    }

    #[test]
    fn test_scans() {
        let mut interp = interp();
        let f = interp.closure(add, 2, &[]);
        let x = interp.int_matrix(1, 3, &[1, 2, 3]).unwrap();
        let zero = interp.int(0);
        let l = interp.matrix_scanl(f, zero, x).unwrap();
        assert_eq!(interp.render(l), "{0,1,3,6}");
        let zero = interp.int(0);
        let r = interp.matrix_scanr(f, zero, x).unwrap();
        assert_eq!(interp.render(r), "{6,5,3,0}");

        let l1 = interp.matrix_scanl1(f, x).unwrap();
        assert_eq!(interp.render(l1), "{1,3,6}");
        let r1 = interp.matrix_scanr1(f, x).unwrap();
        assert_eq!(interp.render(r1), "{6,5,3}");

        let empty = interp.matrix_new(MatrixKind::Int, 0, 0);
        let e = interp.matrix_scanl1(f, empty).unwrap();
        assert_eq!(interp.matrix_dim(e), Ok((1, 0)));
        assert_eq!(interp.matrix_kind(e), Some(MatrixKind::Boxed));
    }

    #[test]
    fn test_selection_keeps_input_kind() {
        let mut interp = interp();
        let p = interp.closure(positive, 1, &[]);
        let x = interp.real_matrix(2, 2, &[1.0, -2.0, 3.0, 4.0]).unwrap();
        let y = interp.matrix_filter(p, x).unwrap();
        assert_eq!(interp.matrix_kind(y), Some(MatrixKind::Real));
        assert_eq!(interp.render(y), "{1.0,3.0,4.0}");

        let t = interp.matrix_takewhile(p, x).unwrap();
        assert_eq!(interp.render(t), "{1.0}");
        let d = interp.matrix_dropwhile(p, x).unwrap();
        assert_eq!(interp.render(d), "{-2.0,3.0,4.0}");

        assert_eq!(interp.matrix_all(p, x), Ok(false));
        assert_eq!(interp.matrix_any(p, x), Ok(true));
        let dropped = interp.matrix_slice(x, 1, 0, 1, 1).unwrap();
        assert_eq!(interp.matrix_all(p, dropped), Ok(true));
    }

    #[test]
    fn test_boxed_filter_shares_elements() {
        let mut interp = interp();
        let p = interp.closure(positive, 1, &[]);
        let a = interp.double(1.0);
        let b = interp.double(-1.0);
        let x = interp.boxed_matrix(1, 2, &[a, b]).unwrap();
        let y = interp.matrix_filter(p, x).unwrap();
        assert_eq!(interp.matrix_kind(y), Some(MatrixKind::Boxed));
        assert_eq!(interp.refc(a), 2);
        assert_eq!(interp.refc(b), 1);
    }

    #[test]
    fn test_predicate_must_return_int() {
        let mut interp = interp();
        let p = interp.closure(not_a_truth_value, 1, &[]);
        let x = interp.int_matrix(1, 2, &[1, 2]).unwrap();
        let depth = interp.shadow_depth();
        let payload = interp
            .invoke(|interp| interp.matrix_filter(p, x))
            .unwrap_err();
        let failed_cond = interp.symtab().builtins().failed_cond;
        assert_eq!(interp.symbol_of(payload), Some(failed_cond));
        assert_eq!(interp.shadow_depth(), depth);
        assert!(interp.is_live(x));
    }

    #[test]
    fn test_non_matrix_argument_fails_to_match() {
        let mut interp = interp();
        let f = interp.closure(double_it, 1, &[]);
        let s = interp.string("not a matrix");
        let payload = interp.invoke(|interp| interp.matrix_map(f, s)).unwrap_err();
        let failed_match = interp.symtab().builtins().failed_match;
        assert_eq!(interp.symbol_of(payload), Some(failed_match));
    }
}
