// Global bindings
//
// Variables and constants bound to symbols, plus externally implemented
// global functions. A binding owns one reference to its value.

use crate::error::{Exception, RuntimeError};
use crate::interpreter::Interpreter;
use crate::term::{Closure, EntryFn, Fun, SymId, TermData, TermRef};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Global {
    pub(crate) value: TermRef,
    pub(crate) constant: bool,
}

impl Interpreter {
    // Binds a variable. Rebinding releases the old value; constants cannot
    // be rebound.
    pub fn define(&mut self, sym: SymId, value: TermRef) -> Result<(), RuntimeError> {
        self.bind(sym, value, false)
    }

    pub fn define_constant(&mut self, sym: SymId, value: TermRef) -> Result<(), RuntimeError> {
        self.bind(sym, value, true)
    }

    fn bind(&mut self, sym: SymId, value: TermRef, constant: bool) -> Result<(), RuntimeError> {
        let Some(name) = self.symtab.name(sym) else {
            return Err(RuntimeError::InvalidSymbol(sym));
        };
        if self.globals.get(&sym).is_some_and(|g| g.constant) {
            return Err(RuntimeError::ConstantRedefinition(name.to_string()));
        }
        log::trace!("define {} (constant: {})", name, constant);
        self.new(value);
        if let Some(old) = self.globals.insert(sym, Global { value, constant }) {
            self.free(old.value);
        }
        Ok(())
    }

    // Removes a binding, constant or not. Returns whether there was one.
    pub fn clear(&mut self, sym: SymId) -> bool {
        match self.globals.remove(&sym) {
            Some(old) => {
                self.free(old.value);
                true
            }
            None => false,
        }
    }

    pub fn global_value(&self, sym: SymId) -> Option<TermRef> {
        self.globals.get(&sym).map(|g| g.value)
    }

    pub fn is_constant(&self, sym: SymId) -> bool {
        self.globals.get(&sym).is_some_and(|g| g.constant)
    }

    // Value of a symbol in an expression: its binding if it has one (forced
    // if it is a thunk), the symbol term otherwise.
    pub fn symbol_value(&mut self, sym: SymId) -> Result<TermRef, Exception> {
        match self.global_value(sym) {
            Some(v) if self.is_thunk(v) => self.force(v),
            Some(v) => Ok(self.resolve(v)),
            None => Ok(self.symbol(sym)),
        }
    }

    // Registers a natively implemented global function under `name`. The
    // symbol's term becomes the function itself, so `constant(name)` yields
    // something callable.
    pub fn define_external(&mut self, name: &str, arity: u32, entry: EntryFn) -> SymId {
        let sym = self.symbol_by_name(name);
        let f = self.heap.alloc(TermData::Fun(Fun {
            sym,
            closure: Some(Closure {
                entry,
                env: Vec::new(),
                arity,
                local: false,
            }),
        }));
        self.new(f);
        if let Some(old) = self.symtab.replace_term(sym, Some(f)) {
            self.free(old);
        }
        log::debug!("external function {}/{} registered", name, arity);
        sym
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::error::{Exception, RuntimeError};
    use crate::interpreter::Interpreter;
    use crate::term::{Outcome, TermRef};

    fn interp() -> Interpreter {
        Interpreter::with_config(RuntimeConfig::default())
    }

    #[test]
    fn test_define_and_rebind() {
        let mut interp = interp();
        let x = interp.symbol_by_name("x");
        let one = interp.int(1);
        let two = interp.int(2);

        interp.define(x, one).unwrap();
        assert_eq!(interp.global_value(x), Some(one));
        assert_eq!(interp.refc(one), 1);

        interp.define(x, two).unwrap();
        assert!(!interp.is_live(one));
        assert_eq!(interp.symbol_value(x).unwrap(), two);

        assert!(interp.clear(x));
        assert!(!interp.is_live(two));
        assert!(!interp.clear(x));
    }

    #[test]
    fn test_constants_cannot_be_rebound() {
        let mut interp = interp();
        let pi = interp.symbol_by_name("pi");
        let v = interp.double(3.14159);
        interp.define_constant(pi, v).unwrap();
        assert!(interp.is_constant(pi));

        let w = interp.double(3.0);
        assert_eq!(
            interp.define(pi, w),
            Err(RuntimeError::ConstantRedefinition("pi".to_string()))
        );
        assert_eq!(interp.global_value(pi), Some(v));
        interp.freenew(w);
    }

    #[test]
    fn test_unbound_symbol_is_its_own_value() {
        let mut interp = interp();
        let foo = interp.symbol_by_name("foo");
        let v = interp.symbol_value(foo).unwrap();
        assert_eq!(interp.symbol_of(v), Some(foo));
    }

    fn twice(
        interp: &mut Interpreter,
        args: &[TermRef],
        _env: &[TermRef],
    ) -> Result<Outcome, Exception> {
        let n = interp.int_val(args[0]).unwrap_or(0);
        Ok(Outcome::Value(interp.int(2 * n)))
    }

    #[test]
    fn test_external_function_replaces_symbol_term() {
        let mut interp = interp();
        let before = interp.constant("twice");
        let sym = interp.define_external("twice", 1, twice);
        assert!(!interp.is_live(before));

        let f = interp.constant("twice");
        assert_eq!(interp.symbol_of(f), Some(sym));
        assert_eq!(interp.arity(f), Some(1));

        let n = interp.int(21);
        let r = interp.app(f, n).unwrap();
        assert_eq!(interp.int_val(r), Some(42));
    }
}
