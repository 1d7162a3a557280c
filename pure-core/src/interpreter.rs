// Interpreter instances
//
// An instance owns everything a running program touches: the term heap, the
// symbol table, the shadow stack, the exception frames and the global
// bindings. All operations take the instance explicitly (`&mut self`).
//
// Collaborators that need an implicit "current" instance use the
// thread-local slot at the bottom of this file. Becoming current is an
// explicit switch, not a concurrency mechanism.

use crate::config::RuntimeConfig;
use crate::exceptions::{ExceptionFrame, stack_address};
use crate::globals::Global;
use crate::heap::{Heap, HeapStats};
use crate::shadow_stack::ShadowStack;
use crate::symtab::SymbolTable;
use crate::term::{SymId, TermRef};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) symtab: SymbolTable,
    pub(crate) sstk: ShadowStack,
    pub(crate) estk: Vec<ExceptionFrame>,
    pub(crate) globals: FxHashMap<SymId, Global>,
    pub(crate) config: RuntimeConfig,
    pub(crate) stack_base: usize,
    // Set while a caught exception's handler is being entered, so that a
    // pending signal does not immediately fire again inside it.
    pub(crate) brkmask: bool,
    // Signal raised for this instance only (see `raise`).
    pub(crate) pending_signal: i32,
}

impl Interpreter {
    // Creates an instance configured from the environment (PURE_STACK).
    pub fn from_env() -> Self {
        Self::with_config(RuntimeConfig::from_env())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let marker = 0u8;
        let interp = Self {
            heap: Heap::new(config.heap_chunk),
            symtab: SymbolTable::new(),
            sstk: ShadowStack::with_capacity(config.shadow_stack_capacity),
            estk: Vec::new(),
            globals: FxHashMap::default(),
            config,
            stack_base: stack_address(&marker),
            brkmask: false,
            pending_signal: 0,
        };
        log::debug!(
            "interpreter created (stack_max = {} bytes, {} builtin symbols)",
            interp.config.stack_max,
            interp.symtab.len()
        );
        interp
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn symtab(&self) -> &SymbolTable {
        &self.symtab
    }

    pub fn symtab_mut(&mut self) -> &mut SymbolTable {
        &mut self.symtab
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Whether `x` still denotes a live term of this instance.
    pub fn is_live(&self, x: TermRef) -> bool {
        self.heap.is_live(x)
    }

    pub fn refc(&self, x: TermRef) -> u32 {
        self.heap.refc(x)
    }

    pub fn tmps(&self) -> Vec<TermRef> {
        self.heap.tmps()
    }

    pub fn is_floating(&self, x: TermRef) -> bool {
        self.heap.is_floating(x)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::from_env()
    }
}

// Deleting an instance drops its global bindings and cached symbol terms
// through the regular release path, so finalizers still run.
impl Drop for Interpreter {
    fn drop(&mut self) {
        let depth = self.sstk.depth();
        if depth > 0 {
            self.unwind_to(0);
        }
        let globals: Vec<Global> = self.globals.drain().map(|(_, g)| g).collect();
        for global in globals {
            self.free(global.value);
        }
        for term in self.symtab.take_terms() {
            self.free(term);
        }
        self.sweep_tmps();
        log::debug!(
            "interpreter deleted ({} terms still live)",
            self.heap.stats().live
        );
    }
}

// RUST CONCEPT: Shared handle plus a thread-local weak "current" slot
// The slot never keeps an instance alive; dropping the last handle deletes
// the instance even if it is current.
pub type InterpHandle = Rc<RefCell<Interpreter>>;

thread_local! {
    static CURRENT: RefCell<Weak<RefCell<Interpreter>>> = RefCell::new(Weak::new());
}

// Creates an instance. It becomes current if no other instance is.
pub fn create_interp(config: RuntimeConfig) -> InterpHandle {
    let handle = Rc::new(RefCell::new(Interpreter::with_config(config)));
    if current_interp().is_none() {
        switch_interp(&handle);
    }
    handle
}

// Makes `handle` the current instance, returning the previous one.
pub fn switch_interp(handle: &InterpHandle) -> Option<InterpHandle> {
    log::debug!("switching current interpreter");
    CURRENT.with(|slot| {
        let previous = slot.replace(Rc::downgrade(handle));
        previous.upgrade()
    })
}

pub fn current_interp() -> Option<InterpHandle> {
    CURRENT.with(|slot| slot.borrow().upgrade())
}

// Runs `f` on the current instance. Returns None if there is none, or if the
// current instance is already borrowed further up the call stack.
pub fn with_current<R>(f: impl FnOnce(&mut Interpreter) -> R) -> Option<R> {
    let handle = current_interp()?;
    let mut interp = handle.try_borrow_mut().ok()?;
    Some(f(&mut interp))
}
