//! Closure snapshots of the lexical-scope stack.

use crate::scope::{self, ScopeRef};
use crate::values::Value;

/// A shallow clone of the scope-stack frame list, captured when a function
/// value is produced. The frame list is immutable after capture, but each
/// scope map is shared by reference with the live stack: mutating a
/// captured variable later is visible through the closure.
#[derive(Debug, Clone)]
pub struct Closure {
    frames: Vec<ScopeRef>,
}

impl Closure {
    pub fn capture(live: &[ScopeRef]) -> Closure {
        Closure {
            frames: live.to_vec(),
        }
    }

    /// The bounded walk of the captured frames, mirroring phase 1 of
    /// lexical lookup.
    pub fn lookup(&self, id: u32) -> Option<Value> {
        scope::lookup_bounded(&self.frames, id)
    }

    pub fn find_scope(&self, id: u32) -> Option<ScopeRef> {
        scope::find_scope_bounded(&self.frames, id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::symbols::intern;

    #[test]
    fn test_capture_shares_scope_maps() {
        let x = intern("closure-test-x");
        let global = Scope::new("global");
        global.write().unwrap().bind(x.id, Value::Int(1));
        let closure = Closure::capture(&[global.clone()]);
        // Post-capture mutation is visible through the snapshot.
        global.write().unwrap().bind(x.id, Value::Int(2));
        assert_eq!(closure.lookup(x.id), Some(Value::Int(2)));
    }

    #[test]
    fn test_capture_is_list_snapshot() {
        let x = intern("closure-test-y");
        let global = Scope::new("global");
        let closure = Closure::capture(&[global.clone()]);
        assert_eq!(closure.depth(), 1);
        // A scope pushed after capture is not part of the snapshot.
        let late = Scope::new("late");
        late.write().unwrap().bind(x.id, Value::Int(9));
        assert_eq!(closure.lookup(x.id), None);
    }
}
