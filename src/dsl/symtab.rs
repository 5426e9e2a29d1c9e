//! Block-structured name resolution.
//!
//! Each name maps to the list of `(scope, declaration)` entries recorded for
//! it, in insertion order. Lookup walks the active scope stack from the
//! innermost scope outward and returns the first scope that has an entry.

use indexmap::IndexMap;

use super::ast::DecId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    scope: u32,
    dec: DecId,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: IndexMap<String, Vec<Entry>>,
    /// Active scope ids, outermost first. Never empty.
    scopes: Vec<u32>,
    next_scope: u32,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table with the root scope (id 0) already active.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            scopes: vec![0],
            next_scope: 1,
        }
    }

    pub fn enter_scope(&mut self) -> u32 {
        let id = self.next_scope;
        self.next_scope += 1;
        self.scopes.push(id);
        id
    }

    /// Leave the innermost scope. The root scope is never left.
    pub fn leave_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn current_scope(&self) -> u32 {
        self.scopes.last().copied().unwrap_or(0)
    }

    /// Number of active scopes, the root included.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Record `dec` under `name` in the current scope. Returns `false` (and
    /// records nothing) if the current scope already has that name.
    pub fn insert(&mut self, name: &str, dec: DecId) -> bool {
        let scope = self.current_scope();
        let list = self.entries.entry(name.to_string()).or_default();
        if list.iter().any(|e| e.scope == scope) {
            return false;
        }
        list.push(Entry { scope, dec });
        true
    }

    /// The declaration visible for `name` from the current scope.
    pub fn lookup(&self, name: &str) -> Option<DecId> {
        let list = self.entries.get(name)?;
        self.scopes.iter().rev().find_map(|&scope| {
            list.iter()
                .rev()
                .find(|e| e.scope == scope)
                .map(|e| e.dec)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup() {
        let mut table = SymbolTable::new();
        assert!(table.insert("x", DecId(0)));
        assert_eq!(table.lookup("x"), Some(DecId(0)));
        assert_eq!(table.lookup("y"), None);
    }

    #[test]
    fn duplicate_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        assert!(table.insert("x", DecId(0)));
        assert!(!table.insert("x", DecId(1)));
        assert_eq!(table.lookup("x"), Some(DecId(0)));
    }

    #[test]
    fn inner_scope_shadows_until_left() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        assert!(table.insert("x", DecId(1)));
        table.enter_scope();
        assert!(table.insert("x", DecId(2)));
        assert_eq!(table.lookup("x"), Some(DecId(2)));
        table.leave_scope();
        assert_eq!(table.lookup("x"), Some(DecId(1)));
        table.leave_scope();
        assert_eq!(table.lookup("x"), None);
    }

    #[test]
    fn sibling_scopes_do_not_see_each_other() {
        let mut table = SymbolTable::new();
        let a = table.enter_scope();
        table.insert("x", DecId(0));
        table.leave_scope();
        let b = table.enter_scope();
        assert_ne!(a, b);
        assert_eq!(table.lookup("x"), None);
        assert!(table.insert("x", DecId(1)));
        assert_eq!(table.lookup("x"), Some(DecId(1)));
    }

    #[test]
    fn outer_names_visible_from_inner_scopes() {
        let mut table = SymbolTable::new();
        table.insert("p", DecId(0));
        table.enter_scope();
        table.enter_scope();
        assert_eq!(table.lookup("p"), Some(DecId(0)));
        assert_eq!(table.depth(), 3);
    }

    #[test]
    fn root_scope_is_never_left() {
        let mut table = SymbolTable::new();
        table.leave_scope();
        table.leave_scope();
        assert_eq!(table.depth(), 1);
        assert_eq!(table.current_scope(), 0);
    }
}
