// Term construction
//
// Every constructor returns a fresh term (count 0, floating on tmps) unless
// noted otherwise. Compound constructors take their own references to the
// components they are given.

use crate::error::fatal;
use crate::interpreter::Interpreter;
use crate::term::{ANONYMOUS, Closure, EntryFn, Fun, SymId, TermData, TermRef, ThunkCell};
use num_bigint::BigInt;

impl Interpreter {
    pub fn int(&mut self, n: i32) -> TermRef {
        self.heap.alloc(TermData::Int(n))
    }

    // 64-bit integers always become bigints.
    pub fn long(&mut self, n: i64) -> TermRef {
        self.heap.alloc(TermData::BigInt(BigInt::from(n)))
    }

    pub fn bigint(&mut self, n: BigInt) -> TermRef {
        self.heap.alloc(TermData::BigInt(n))
    }

    pub fn double(&mut self, d: f64) -> TermRef {
        self.heap.alloc(TermData::Double(d))
    }

    pub fn string(&mut self, s: impl Into<String>) -> TermRef {
        self.heap.alloc(TermData::Str(s.into()))
    }

    pub fn pointer(&mut self, p: usize) -> TermRef {
        self.heap.alloc(TermData::Pointer(p))
    }

    // The singleton term of a symbol. It is owned by the symbol table, so the
    // result is never floating. Global functions are represented by their
    // closure here.
    pub fn symbol(&mut self, sym: SymId) -> TermRef {
        if let Some(t) = self.symtab.term(sym) {
            return t;
        }
        if self.symtab.get(sym).is_none() {
            fatal(format_args!("invalid symbol id {}", sym));
        }
        let t = self.heap.alloc(TermData::Fun(Fun { sym, closure: None }));
        self.new(t);
        self.symtab.replace_term(sym, Some(t));
        t
    }

    // Resolves `name` the way the foreign boundary does: qualified names are
    // taken literally, unqualified ones refer to the default namespace, and
    // missing symbols are created.
    pub fn symbol_by_name(&mut self, name: &str) -> SymId {
        self.symtab.intern_qualified(name)
    }

    pub fn constant(&mut self, name: &str) -> TermRef {
        let sym = self.symbol_by_name(name);
        self.symbol(sym)
    }

    // Anonymous local closure capturing `env`.
    pub fn closure(&mut self, entry: EntryFn, arity: u32, env: &[TermRef]) -> TermRef {
        self.new_args(env);
        self.heap.alloc(TermData::Fun(Fun {
            sym: ANONYMOUS,
            closure: Some(Closure {
                entry,
                env: env.to_vec(),
                arity,
                local: true,
            }),
        }))
    }

    // Deferred computation, evaluated at most once by `force`.
    pub fn thunk(&mut self, entry: EntryFn, env: &[TermRef]) -> TermRef {
        self.new_args(env);
        self.heap.alloc(TermData::Thunk(ThunkCell::Pending(Closure {
            entry,
            env: env.to_vec(),
            arity: 0,
            local: true,
        })))
    }

    // Literal application node; no call is attempted.
    pub fn app_node(&mut self, f: TermRef, x: TermRef) -> TermRef {
        self.new(f);
        self.new(x);
        self.heap.alloc(TermData::App(f, x))
    }

    // Literal application of a function to several arguments.
    pub fn app_nodes(&mut self, f: TermRef, xs: &[TermRef]) -> TermRef {
        xs.iter().fold(f, |g, &x| self.app_node(g, x))
    }

    fn binary(&mut self, op: SymId, x: TermRef, y: TermRef) -> TermRef {
        let f = self.symbol(op);
        let fx = self.app_node(f, x);
        self.app_node(fx, y)
    }

    // x:xs
    pub fn cons(&mut self, x: TermRef, xs: TermRef) -> TermRef {
        let cons = self.symtab.builtins().cons;
        self.binary(cons, x, xs)
    }

    pub fn nil(&mut self) -> TermRef {
        let nil = self.symtab.builtins().nil;
        self.symbol(nil)
    }

    pub fn void(&mut self) -> TermRef {
        let void = self.symtab.builtins().void;
        self.symbol(void)
    }

    // [x1,...,xn], built back to front.
    pub fn list(&mut self, xs: &[TermRef]) -> TermRef {
        let tail = self.nil();
        self.list_tail(xs, tail)
    }

    // x1:...:xn:tail
    pub fn list_tail(&mut self, xs: &[TermRef], tail: TermRef) -> TermRef {
        xs.iter().rev().fold(tail, |tl, &x| self.cons(x, tl))
    }

    // (x1,...,xn). A one-element tuple is the element itself and the empty
    // tuple is ().
    pub fn tuple(&mut self, xs: &[TermRef]) -> TermRef {
        let Some((&last, init)) = xs.split_last() else {
            return self.void();
        };
        let pair = self.symtab.builtins().pair;
        init.iter()
            .rev()
            .fold(last, |tl, &x| self.binary(pair, x, tl))
    }

    // re +: im
    pub fn complex(&mut self, re: f64, im: f64) -> TermRef {
        let rect = self.symtab.builtins().complex_rect;
        let (x, y) = (self.double(re), self.double(im));
        self.binary(rect, x, y)
    }

    // r <: theta
    pub fn complex_polar(&mut self, r: f64, theta: f64) -> TermRef {
        let polar = self.symtab.builtins().complex_polar;
        let (x, y) = (self.double(r), self.double(theta));
        self.binary(polar, x, y)
    }
}
