// Symbol table and namespace resolution
//
// Symbols are stored under their fully qualified name ("ns::name"); symbols
// in the default namespace carry no qualifier. Ids are handed out
// consecutively from 1 and never change.
//
// Unqualified lookup order:
// 1. the current namespace
// 2. every search namespace (a hit in more than one is ambiguous)
// 3. the default namespace
//
// Ambiguity and invisibility are reported through `Lookup::count` rather
// than as errors, so callers can pick their own fallback.

use crate::error::RuntimeError;
use crate::term::{SymId, TermRef};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

const SEPARATOR: &str = "::";

pub const PREC_MAX: u8 = 10;
pub const NPREC_MAX: u8 = 100;

// RUST CONCEPT: Explicit discriminants
// The numeric values take part in the combined precedence computed by
// `nprec`, so the declaration order is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Fixity {
    Infix = 0,
    InfixL = 1,
    InfixR = 2,
    Prefix = 3,
    Postfix = 4,
    Outfix = 5,
    Nullary = 6,
}

// Combined precedence used by the printer: operators compare by level
// first, fixity second; outfix and nullary symbols bind tightest.
pub fn nprec(prec: u8, fixity: Fixity) -> u8 {
    match fixity {
        Fixity::Outfix | Fixity::Nullary => NPREC_MAX,
        _ => 10 * prec.min(PREC_MAX) + fixity as u8,
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymId,
    pub name: String,
    pub prec: u8,
    pub fixity: Fixity,
    pub private: bool,
    // Cached singleton term, owned by the table.
    pub(crate) term: Option<TermRef>,
}

impl Symbol {
    fn new(id: SymId, name: String, prec: u8, fixity: Fixity, private: bool) -> Self {
        Self {
            id,
            name,
            prec,
            fixity,
            private,
            term: None,
        }
    }

    /// Namespace part of the name; empty for the default namespace.
    pub fn qualifier(&self) -> &str {
        match self.name.rfind(SEPARATOR) {
            Some(k) => &self.name[..k],
            None => "",
        }
    }

    /// Name without its namespace qualifier.
    pub fn local_name(&self) -> &str {
        match self.name.rfind(SEPARATOR) {
            Some(k) => &self.name[k + SEPARATOR.len()..],
            None => &self.name,
        }
    }

    pub fn nprec(&self) -> u8 {
        nprec(self.prec, self.fixity)
    }
}

/// Result of a lookup.
///
/// `count` is 0 when nothing was found. With `symbol == None`, a count of 1
/// means the symbol exists but is private to another namespace, and a count
/// above 1 means the name matched in several search namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub symbol: Option<SymId>,
    pub count: u32,
}

impl Lookup {
    fn found(id: SymId) -> Self {
        Self {
            symbol: Some(id),
            count: 1,
        }
    }

    fn exact(hit: (Option<SymId>, u32)) -> Self {
        Self {
            symbol: hit.0,
            count: hit.1,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.symbol.is_none() && self.count > 1
    }

    pub fn is_private(&self) -> bool {
        self.symbol.is_none() && self.count == 1
    }

    pub fn is_missing(&self) -> bool {
        self.count == 0
    }
}

/// Ids of the symbols the runtime itself relies on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins {
    pub anon: SymId,
    pub nil: SymId,
    pub cons: SymId,
    pub void: SymId,
    pub pair: SymId,
    pub seq: SymId,
    pub not: SymId,
    pub bitnot: SymId,
    pub or: SymId,
    pub and: SymId,
    pub bitor: SymId,
    pub bitand: SymId,
    pub shl: SymId,
    pub shr: SymId,
    pub less: SymId,
    pub greater: SymId,
    pub lesseq: SymId,
    pub greatereq: SymId,
    pub equal: SymId,
    pub notequal: SymId,
    pub plus: SymId,
    pub minus: SymId,
    pub mult: SymId,
    pub fdiv: SymId,
    pub div: SymId,
    pub modulo: SymId,
    pub amp: SymId,
    pub complex_rect: SymId,
    pub complex_polar: SymId,
    pub quote: SymId,
    pub catch: SymId,
    pub failed_match: SymId,
    pub failed_cond: SymId,
    pub signal: SymId,
    pub stack_fault: SymId,
    pub bad_matrix: SymId,
}

#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, SymId>,
    current_namespace: String,
    search_namespaces: BTreeSet<String>,
    builtins: Builtins,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut tab = Self {
            symbols: Vec::with_capacity(1024),
            by_name: FxHashMap::default(),
            current_namespace: String::new(),
            search_namespaces: BTreeSet::new(),
            builtins: Builtins::default(),
        };
        tab.init_builtins();
        tab
    }

    fn init_builtins(&mut self) {
        use Fixity::*;
        let op = |tab: &mut Self, name: &str, prec: u8, fix: Fixity| {
            tab.create(name.to_string(), prec, fix, false)
        };
        let b = Builtins {
            // anonymous variable
            anon: op(self, "_", PREC_MAX, Infix),
            nil: op(self, "[]", 10, Nullary),
            cons: op(self, ":", 4, InfixR),
            void: op(self, "()", 10, Nullary),
            pair: op(self, ",", 1, InfixR),
            seq: op(self, "$$", 0, InfixL),
            not: op(self, "~", 3, Prefix),
            bitnot: op(self, "not", 7, Prefix),
            or: op(self, "||", 2, InfixR),
            and: op(self, "&&", 3, InfixR),
            bitor: op(self, "or", 6, InfixL),
            bitand: op(self, "and", 7, InfixL),
            shl: op(self, "<<", 5, InfixL),
            shr: op(self, ">>", 5, InfixL),
            less: op(self, "<", 4, Infix),
            greater: op(self, ">", 4, Infix),
            lesseq: op(self, "<=", 4, Infix),
            greatereq: op(self, ">=", 4, Infix),
            equal: op(self, "==", 4, Infix),
            notequal: op(self, "~=", 4, Infix),
            plus: op(self, "+", 6, InfixL),
            minus: op(self, "-", 6, InfixL),
            mult: op(self, "*", 7, InfixL),
            fdiv: op(self, "/", 7, InfixL),
            div: op(self, "div", 7, InfixL),
            modulo: op(self, "mod", 7, InfixL),
            amp: op(self, "&", 9, Postfix),
            complex_rect: op(self, "+:", 5, Infix),
            complex_polar: op(self, "<:", 5, Infix),
            quote: op(self, "quote", PREC_MAX, Infix),
            catch: op(self, "catch", PREC_MAX, Infix),
            failed_match: op(self, "failed_match", PREC_MAX, Infix),
            failed_cond: op(self, "failed_cond", PREC_MAX, Infix),
            signal: op(self, "signal", PREC_MAX, Infix),
            stack_fault: op(self, "stack_fault", PREC_MAX, Infix),
            bad_matrix: op(self, "bad_matrix_value", PREC_MAX, Infix),
        };
        self.builtins = b;
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, id: SymId) -> Option<&Symbol> {
        if id == 0 {
            return None;
        }
        self.symbols.get(id as usize - 1)
    }

    fn get_mut(&mut self, id: SymId) -> Option<&mut Symbol> {
        if id == 0 {
            return None;
        }
        self.symbols.get_mut(id as usize - 1)
    }

    pub fn name(&self, id: SymId) -> Option<&str> {
        self.get(id).map(|s| s.name.as_str())
    }

    pub fn nprec(&self, id: SymId) -> Option<u8> {
        self.get(id).map(Symbol::nprec)
    }

    fn create(&mut self, name: String, prec: u8, fixity: Fixity, private: bool) -> SymId {
        let id = self.symbols.len() as SymId + 1;
        self.by_name.insert(name.clone(), id);
        self.symbols
            .push(Symbol::new(id, name, prec.min(PREC_MAX), fixity, private));
        id
    }

    // Whether a symbol can be seen from the current namespace.
    pub fn visible(&self, id: SymId) -> bool {
        match self.get(id) {
            Some(sym) if sym.private => {
                let qual = sym.qualifier();
                qual.is_empty() || qual == self.current_namespace
            }
            Some(_) => true,
            None => false,
        }
    }

    // Exact lookup with no namespace search. The count says whether the name
    // exists at all, the id whether it is visible.
    fn lookup_exact(&self, name: &str) -> (Option<SymId>, u32) {
        match self.by_name.get(name) {
            Some(&id) if self.visible(id) => (Some(id), 1),
            Some(_) => (None, 1),
            None => (None, 0),
        }
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        if let Some(k) = name.find(SEPARATOR) {
            // Qualified name; "::x" denotes x in the default namespace.
            let name = if k == 0 { &name[SEPARATOR.len()..] } else { name };
            return Lookup::exact(self.lookup_exact(name));
        }
        let default_sym = self.lookup_exact(name).0;
        if name == "_" {
            return Lookup {
                symbol: default_sym,
                count: default_sym.is_some() as u32,
            };
        }
        if !self.current_namespace.is_empty() {
            let id = format!("{}{}{}", self.current_namespace, SEPARATOR, name);
            if let (Some(sym), _) = self.lookup_exact(&id) {
                return Lookup::found(sym);
            }
        }
        let mut count = 0;
        let mut search_sym = None;
        for ns in &self.search_namespaces {
            let id = format!("{}{}{}", ns, SEPARATOR, name);
            if let (Some(sym), _) = self.lookup_exact(&id) {
                count += 1;
                if count > 1 {
                    return Lookup {
                        symbol: None,
                        count,
                    };
                }
                search_sym = Some(sym);
            }
        }
        if let Some(sym) = search_sym {
            return Lookup::found(sym);
        }
        Lookup {
            symbol: default_sym,
            count: default_sym.is_some() as u32,
        }
    }

    // `lookup` with the failure cases turned into errors. A name that does
    // not exist at all is `Ok(None)`.
    pub fn check_sym(&self, name: &str) -> Result<Option<SymId>, RuntimeError> {
        let found = self.lookup(name);
        if found.is_ambiguous() {
            Err(RuntimeError::AmbiguousSymbol(name.to_string()))
        } else if found.is_private() {
            Err(RuntimeError::PrivateSymbol(name.to_string()))
        } else {
            Ok(found.symbol)
        }
    }

    // Looks a symbol up, creating it in the default namespace (or under the
    // given qualifier) if it does not exist yet.
    pub fn intern(&mut self, name: &str) -> Result<SymId, RuntimeError> {
        self.intern_with(name, PREC_MAX, Fixity::Infix, false)
    }

    pub fn intern_with(
        &mut self,
        name: &str,
        prec: u8,
        fixity: Fixity,
        private: bool,
    ) -> Result<SymId, RuntimeError> {
        if prec > PREC_MAX {
            return Err(RuntimeError::BadPrecedence(prec));
        }
        let found = self.lookup(name);
        if let Some(id) = found.symbol {
            return Ok(id);
        }
        if found.is_ambiguous() {
            return Err(RuntimeError::AmbiguousSymbol(name.to_string()));
        }
        let id = name.strip_prefix(SEPARATOR).unwrap_or(name);
        if self.by_name.contains_key(id) {
            // exists, but is private to another namespace
            return Err(RuntimeError::PrivateSymbol(name.to_string()));
        }
        Ok(self.create(id.to_string(), prec, fixity, private))
    }

    // Declares a symbol in the current namespace (unqualified names are
    // qualified with it). An existing declaration of the same name is
    // returned unchanged.
    pub fn declare(
        &mut self,
        name: &str,
        prec: u8,
        fixity: Fixity,
        private: bool,
    ) -> Result<SymId, RuntimeError> {
        if prec > PREC_MAX {
            return Err(RuntimeError::BadPrecedence(prec));
        }
        let id = if name.contains(SEPARATOR) || self.current_namespace.is_empty() {
            name.strip_prefix(SEPARATOR).unwrap_or(name).to_string()
        } else {
            format!("{}{}{}", self.current_namespace, SEPARATOR, name)
        };
        if let Some(&existing) = self.by_name.get(&id) {
            return Ok(existing);
        }
        Ok(self.create(id, prec, fixity, private))
    }

    // Resolves a name regardless of visibility, creating a public symbol if
    // it does not exist. Unqualified names refer to the default namespace.
    pub fn intern_qualified(&mut self, name: &str) -> SymId {
        let id = name.strip_prefix(SEPARATOR).unwrap_or(name);
        match self.by_name.get(id) {
            Some(&sym) => sym,
            None => self.create(id.to_string(), PREC_MAX, Fixity::Infix, false),
        }
    }

    pub fn set_fixity(&mut self, id: SymId, prec: u8, fixity: Fixity) -> Result<(), RuntimeError> {
        if prec > PREC_MAX {
            return Err(RuntimeError::BadPrecedence(prec));
        }
        let sym = self.get_mut(id).ok_or(RuntimeError::InvalidSymbol(id))?;
        sym.prec = prec;
        sym.fixity = fixity;
        Ok(())
    }

    pub fn current_namespace(&self) -> &str {
        &self.current_namespace
    }

    pub fn set_current_namespace(&mut self, ns: &str) {
        self.current_namespace = ns.strip_prefix(SEPARATOR).unwrap_or(ns).to_string();
    }

    pub fn add_search_namespace(&mut self, ns: &str) {
        self.search_namespaces
            .insert(ns.strip_prefix(SEPARATOR).unwrap_or(ns).to_string());
    }

    pub fn remove_search_namespace(&mut self, ns: &str) -> bool {
        self.search_namespaces
            .remove(ns.strip_prefix(SEPARATOR).unwrap_or(ns))
    }

    pub fn clear_search_namespaces(&mut self) {
        self.search_namespaces.clear();
    }

    pub fn search_namespaces(&self) -> impl Iterator<Item = &str> {
        self.search_namespaces.iter().map(String::as_str)
    }

    pub(crate) fn term(&self, id: SymId) -> Option<TermRef> {
        self.get(id).and_then(|s| s.term)
    }

    pub(crate) fn replace_term(&mut self, id: SymId, term: Option<TermRef>) -> Option<TermRef> {
        let sym = self.get_mut(id)?;
        core::mem::replace(&mut sym.term, term)
    }

    // Hands over every cached term; used when the instance is deleted.
    pub(crate) fn take_terms(&mut self) -> Vec<TermRef> {
        self.symbols.iter_mut().filter_map(|s| s.term.take()).collect()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
