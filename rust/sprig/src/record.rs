//! Insertion-ordered associative records.
//!
//! Key order is tracked in a separate order list, independent of the hash
//! layout. Deleting a key and inserting it again appends it at the end of
//! the order rather than restoring its original position.

use std::collections::HashMap;
use std::fmt;

use crate::error::SprigError;
use crate::interop::ForeignBinding;
use crate::symbols::Symbol;
use crate::values::Value;

/// Record keys are restricted to hashable value kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Char(char),
    Str(String),
    Symbol(Symbol),
    Bool(bool),
}

impl Key {
    pub fn from_value(v: &Value) -> Result<Key, SprigError> {
        match v {
            Value::Int(n) => Ok(Key::Int(*n)),
            Value::Char(c) => Ok(Key::Char(*c)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Symbol(s) => Ok(Key::Symbol(s.clone())),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            other => Err(SprigError::Type(format!(
                "cannot use {} as a record key",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::Int(*n),
            Key::Char(c) => Value::Char(*c),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Symbol(s) => Value::Symbol(s.clone()),
            Key::Bool(b) => Value::Bool(*b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().display_quoted())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    pub type_name: Option<String>,
    entries: HashMap<Key, Value>,
    order: Vec<Key>,
    pub foreign: Option<ForeignBinding>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(name: impl Into<String>) -> Self {
        Record {
            type_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert or overwrite. A key absent from the map is appended to the
    /// order list; overwriting keeps the key's current position.
    pub fn insert(&mut self, key: Key, value: Value) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Remove a key, dropping it from the order list as well.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.order.iter()
    }

    /// Key/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.order.iter().map(move |k| (k, &self.entries[k]))
    }

    pub fn display(&self) -> String {
        let body: Vec<String> = self
            .iter()
            .map(|(k, v)| {
                format!(
                    "{} {}",
                    k.to_value().display_quoted(),
                    v.display_quoted()
                )
            })
            .collect();
        match &self.type_name {
            Some(name) => format!("({} {})", name, body.join(" ")),
            None => format!("{{{}}}", body.join(" ")),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.order == other.order
            && self.entries == other.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skey(s: &str) -> Key {
        Key::Str(s.to_string())
    }

    #[test]
    fn test_insertion_order() {
        let mut r = Record::new();
        r.insert(skey("a"), Value::Int(1));
        r.insert(skey("b"), Value::Int(2));
        r.insert(skey("c"), Value::Int(3));
        let keys: Vec<_> = r.keys().cloned().collect();
        assert_eq!(keys, vec![skey("a"), skey("b"), skey("c")]);
    }

    #[test]
    fn test_delete_reinsert_appends() {
        let mut r = Record::new();
        r.insert(skey("a"), Value::Int(1));
        r.insert(skey("b"), Value::Int(2));
        r.insert(skey("c"), Value::Int(3));
        r.remove(&skey("b"));
        r.insert(skey("b"), Value::Int(4));
        let keys: Vec<_> = r.keys().cloned().collect();
        assert_eq!(keys, vec![skey("a"), skey("c"), skey("b")]);
        assert_eq!(r.get(&skey("b")), Some(&Value::Int(4)));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut r = Record::new();
        r.insert(skey("a"), Value::Int(1));
        r.insert(skey("b"), Value::Int(2));
        r.insert(skey("a"), Value::Int(9));
        let keys: Vec<_> = r.keys().cloned().collect();
        assert_eq!(keys, vec![skey("a"), skey("b")]);
        assert_eq!(r.get(&skey("a")), Some(&Value::Int(9)));
    }

    #[test]
    fn test_unhashable_key_rejected() {
        let err = Key::from_value(&Value::Float(1.5)).unwrap_err();
        assert!(err.is_type());
    }
}
