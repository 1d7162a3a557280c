// Term inspection
//
// Each test returns an Option: None means "not this kind of term". Forced
// thunks are transparent, every accessor looks through them.

use crate::interpreter::Interpreter;
use crate::term::{Fun, SymId, TermData, TermKind, TermRef, ThunkCell};
use num_bigint::BigInt;
use num_complex::Complex64;
use num_traits::ToPrimitive;

impl Interpreter {
    // Follows forced thunk cells to the value they hold.
    pub fn resolve(&self, mut x: TermRef) -> TermRef {
        while let TermData::Thunk(ThunkCell::Forced(v)) = self.heap.data(x) {
            x = *v;
        }
        x
    }

    pub(crate) fn data_of(&self, x: TermRef) -> &TermData {
        self.heap.data(self.resolve(x))
    }

    pub fn kind(&self, x: TermRef) -> TermKind {
        match self.data_of(x).kind() {
            Some(kind) => kind,
            None => crate::error::fatal(format_args!("kind: vacant term {:?}", x)),
        }
    }

    pub fn int_val(&self, x: TermRef) -> Option<i32> {
        match self.data_of(x) {
            TermData::Int(n) => Some(*n),
            _ => None,
        }
    }

    // Exact integer value, machine ints included.
    pub fn bigint_val(&self, x: TermRef) -> Option<BigInt> {
        match self.data_of(x) {
            TermData::Int(n) => Some(BigInt::from(*n)),
            TermData::BigInt(n) => Some(n.clone()),
            _ => None,
        }
    }

    pub fn double_val(&self, x: TermRef) -> Option<f64> {
        match self.data_of(x) {
            TermData::Double(d) => Some(*d),
            _ => None,
        }
    }

    // Any real number as a double.
    pub fn dbl_val(&self, x: TermRef) -> Option<f64> {
        match self.data_of(x) {
            TermData::Int(n) => Some(f64::from(*n)),
            TermData::BigInt(n) => n.to_f64(),
            TermData::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn string_val(&self, x: TermRef) -> Option<&str> {
        match self.data_of(x) {
            TermData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn pointer_val(&self, x: TermRef) -> Option<usize> {
        match self.data_of(x) {
            TermData::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    // Symbol (or named global function) a term stands for.
    pub fn symbol_of(&self, x: TermRef) -> Option<SymId> {
        match self.data_of(x) {
            TermData::Fun(Fun { sym, .. }) if *sym != 0 => Some(*sym),
            _ => None,
        }
    }

    pub fn app_parts(&self, x: TermRef) -> Option<(TermRef, TermRef)> {
        match self.data_of(x) {
            TermData::App(f, a) => Some((*f, *a)),
            _ => None,
        }
    }

    // Splits `f x1 ... xn` into the head and its arguments in order.
    pub fn app_spine(&self, x: TermRef) -> (TermRef, Vec<TermRef>) {
        let mut args = Vec::new();
        let mut head = self.resolve(x);
        while let Some((f, a)) = self.app_parts(head) {
            args.push(a);
            head = self.resolve(f);
        }
        args.reverse();
        (head, args)
    }

    // `op x y` for a given binary operator symbol.
    fn binary_parts(&self, op: SymId, x: TermRef) -> Option<(TermRef, TermRef)> {
        let (fx, y) = self.app_parts(x)?;
        let (f, x) = self.app_parts(fx)?;
        (self.symbol_of(f) == Some(op)).then_some((x, y))
    }

    pub fn cons_parts(&self, x: TermRef) -> Option<(TermRef, TermRef)> {
        self.binary_parts(self.symtab.builtins().cons, x)
    }

    pub fn is_nil(&self, x: TermRef) -> bool {
        self.symbol_of(x) == Some(self.symtab.builtins().nil)
    }

    // Elements of a proper list, None for anything else.
    pub fn list_elems(&self, x: TermRef) -> Option<Vec<TermRef>> {
        let mut out = Vec::new();
        let mut cur = x;
        loop {
            if self.is_nil(cur) {
                return Some(out);
            }
            let (hd, tl) = self.cons_parts(cur)?;
            out.push(hd);
            cur = tl;
        }
    }

    // Every term is a tuple: () has no elements, a non-pair has one.
    pub fn tuple_elems(&self, x: TermRef) -> Vec<TermRef> {
        let builtins = self.symtab.builtins();
        if self.symbol_of(x) == Some(builtins.void) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut cur = x;
        while let Some((hd, tl)) = self.binary_parts(builtins.pair, cur) {
            out.push(hd);
            cur = tl;
        }
        out.push(cur);
        out
    }

    // Complex numbers are written `re +: im` or `r <: theta`.
    pub fn complex_val(&self, x: TermRef) -> Option<Complex64> {
        let builtins = self.symtab.builtins();
        if let Some((a, b)) = self.binary_parts(builtins.complex_rect, x) {
            return Some(Complex64::new(self.dbl_val(a)?, self.dbl_val(b)?));
        }
        let (r, theta) = self.binary_parts(builtins.complex_polar, x)?;
        Some(Complex64::from_polar(self.dbl_val(r)?, self.dbl_val(theta)?))
    }

    /// Declared arity of a function term.
    pub fn arity(&self, x: TermRef) -> Option<u32> {
        match self.data_of(x) {
            TermData::Fun(Fun {
                closure: Some(clos),
                ..
            }) => Some(clos.arity),
            _ => None,
        }
    }

    pub fn is_function(&self, x: TermRef) -> bool {
        self.arity(x).is_some()
    }

    // A thunk that has not been forced yet.
    pub fn is_thunk(&self, x: TermRef) -> bool {
        matches!(self.heap.data(x), TermData::Thunk(ThunkCell::Pending(_)))
    }

    // Whether the term is (or was) a thunk cell.
    pub fn is_forced(&self, x: TermRef) -> bool {
        matches!(self.heap.data(x), TermData::Thunk(ThunkCell::Forced(_)))
    }
}
