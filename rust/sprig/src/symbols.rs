//! Process-wide symbol interning.
//!
//! Names are mapped to small monotonically-assigned ids that are never
//! reused. All interpreter instances in a process share one table, so a
//! symbol id is a stable identity for scope-map keys and fast equality.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

static TABLE: Lazy<Mutex<SymbolTable>> = Lazy::new(|| Mutex::new(SymbolTable::new()));

/// An interned name: the spelling, its stable id, and reader flags.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: Arc<str>,
    pub id: u32,
    /// Spelling contains an interior `.`, e.g. `point.x` — resolved as a
    /// record field path rather than a plain binding.
    pub is_dot: bool,
    /// Spelling starts with `$` — self-evaluating.
    pub is_sigil: bool,
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Default)]
struct SymbolTable {
    names: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32>,
}

impl SymbolTable {
    fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, name: &str) -> (Arc<str>, u32) {
        if let Some(&id) = self.lookup.get(name) {
            return (self.names[id as usize].clone(), id);
        }
        let id = self.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        self.names.push(name.clone());
        self.lookup.insert(name.clone(), id);
        (name, id)
    }

    fn resolve(&self, id: u32) -> Option<Arc<str>> {
        self.names.get(id as usize).cloned()
    }
}

/// Intern `name`, returning the same id for the same spelling every time.
pub fn intern(name: &str) -> Symbol {
    let (name, id) = TABLE.lock().expect("symbol table poisoned").intern(name);
    let is_dot = name.len() > 1 && !name.starts_with('.') && name.contains('.');
    let is_sigil = name.starts_with('$') && name.len() > 1;
    Symbol {
        name,
        id,
        is_dot,
        is_sigil,
    }
}

/// Resolve an id back to its spelling, if it was ever interned.
pub fn resolve(id: u32) -> Option<Arc<str>> {
    TABLE.lock().expect("symbol table poisoned").resolve(id)
}

/// Counter for generated names (loop labels, anonymous functions).
static GENSYM: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(0));

/// Intern a fresh name that cannot collide with source spellings.
pub fn gensym(prefix: &str) -> Symbol {
    let mut n = GENSYM.lock().expect("gensym counter poisoned");
    *n += 1;
    intern(&format!("__{}_{}", prefix, *n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = intern("stable-name-test");
        let b = intern("stable-name-test");
        assert_eq!(a.id, b.id);
        assert_eq!(a, b);
        assert_eq!(resolve(a.id).as_deref(), Some("stable-name-test"));
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        let x = intern("distinct-x");
        let y = intern("distinct-y");
        assert_ne!(x.id, y.id);
    }

    #[test]
    fn test_flags() {
        assert!(intern("point.x").is_dot);
        assert!(!intern("plain").is_dot);
        assert!(!intern(".hidden").is_dot);
        assert!(intern("$cmd").is_sigil);
        assert!(!intern("$").is_sigil);
    }

    #[test]
    fn test_gensym_unique() {
        let a = gensym("loop");
        let b = gensym("loop");
        assert_ne!(a.id, b.id);
    }
}
