//! Lexical scopes and the bounded lookup walk.
//!
//! A scope is one mutable symbol-id → value map. The scope stack's frame 0
//! is always the interpreter's global scope; function calls push a scope
//! flagged as a call-frame boundary, which bounds the first phase of
//! lexical lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::values::Value;

pub type ScopeRef = Arc<RwLock<Scope>>;

#[derive(Debug, Default)]
pub struct Scope {
    /// Shown in stack traces and scope dumps.
    pub name: String,
    /// Marks a call-frame boundary for the bounded lookup walk.
    pub is_function: bool,
    map: HashMap<u32, Value>,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> ScopeRef {
        Arc::new(RwLock::new(Scope {
            name: name.into(),
            is_function: false,
            map: HashMap::new(),
        }))
    }

    pub fn function(name: impl Into<String>) -> ScopeRef {
        Arc::new(RwLock::new(Scope {
            name: name.into(),
            is_function: true,
            map: HashMap::new(),
        }))
    }

    pub fn get(&self, id: u32) -> Option<Value> {
        self.map.get(&id).cloned()
    }

    pub fn bind(&mut self, id: u32, value: Value) {
        self.map.insert(id, value);
    }

    pub fn contains(&self, id: u32) -> bool {
        self.map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Walk `frames` innermost → outermost, stopping after the nearest
/// function-boundary scope. Returns the first binding found.
pub fn lookup_bounded(frames: &[ScopeRef], id: u32) -> Option<Value> {
    for frame in frames.iter().rev() {
        let scope = frame.read().expect("scope lock");
        if let Some(v) = scope.get(id) {
            return Some(v);
        }
        if scope.is_function {
            break;
        }
    }
    None
}

/// Same walk as [`lookup_bounded`], but returns the scope holding the
/// binding (for rebinding in place).
pub fn find_scope_bounded(frames: &[ScopeRef], id: u32) -> Option<ScopeRef> {
    for frame in frames.iter().rev() {
        let scope = frame.read().expect("scope lock");
        if scope.contains(id) {
            return Some(frame.clone());
        }
        if scope.is_function {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::intern;

    #[test]
    fn test_innermost_binding_shadows() {
        let x = intern("scope-test-x");
        let outer = Scope::new("outer");
        let inner = Scope::new("inner");
        outer.write().unwrap().bind(x.id, Value::Int(1));
        inner.write().unwrap().bind(x.id, Value::Int(2));
        let frames = vec![outer, inner];
        assert_eq!(lookup_bounded(&frames, x.id), Some(Value::Int(2)));
    }

    #[test]
    fn test_walk_stops_at_function_boundary() {
        let x = intern("scope-test-y");
        let global = Scope::new("global");
        global.write().unwrap().bind(x.id, Value::Int(1));
        let call = Scope::function("f");
        let inner = Scope::new("let");
        let frames = vec![global, call, inner];
        // The binding lives below the call boundary, so the bounded walk
        // must not see it.
        assert_eq!(lookup_bounded(&frames, x.id), None);
    }

    #[test]
    fn test_function_scope_itself_is_searched() {
        let x = intern("scope-test-param");
        let global = Scope::new("global");
        let call = Scope::function("f");
        call.write().unwrap().bind(x.id, Value::Int(42));
        let frames = vec![global, call];
        assert_eq!(lookup_bounded(&frames, x.id), Some(Value::Int(42)));
    }

    #[test]
    fn test_find_scope_returns_holder() {
        let x = intern("scope-test-z");
        let outer = Scope::new("outer");
        outer.write().unwrap().bind(x.id, Value::Int(7));
        let inner = Scope::new("inner");
        let frames = vec![outer.clone(), inner];
        let holder = find_scope_bounded(&frames, x.id).unwrap();
        assert!(Arc::ptr_eq(&holder, &outer));
    }
}
