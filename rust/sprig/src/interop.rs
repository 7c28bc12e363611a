//! Host interop: foreign-struct registry and the generic JSON tree.
//!
//! Conversion between values and host records goes through
//! `serde_json::Value` as the intermediate form: host types that implement
//! [`ForeignStruct`] read and write that tree, and the `json-encode` /
//! `json-decode` builtins reuse the same conversion.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::SprigError;
use crate::record::{Key, Record};
use crate::values::Value;

/// A host-side record bound to a sprig record value.
pub trait ForeignStruct: Send {
    fn type_name(&self) -> &str;
    /// Serialize the current host state into the generic tree.
    fn to_tree(&self) -> serde_json::Value;
    /// Overwrite host state from the generic tree.
    fn set_from_tree(&mut self, tree: &serde_json::Value) -> Result<(), String>;
    /// Field-name → wire-tag map exposed to the core.
    fn field_tags(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

impl fmt::Debug for dyn ForeignStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignStruct")
            .field("type_name", &self.type_name())
            .finish()
    }
}

pub type Factory = fn() -> Box<dyn ForeignStruct>;

/// Registry mapping type names to zero-argument factories.
#[derive(Default, Clone)]
pub struct StructRegistry {
    factories: HashMap<String, Factory>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, factory: Factory) {
        self.factories.insert(type_name.into(), factory);
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn ForeignStruct>, SprigError> {
        match self.factories.get(type_name) {
            Some(factory) => Ok(factory()),
            None => Err(SprigError::Lookup(format!(
                "no registered host type `{}`",
                type_name
            ))),
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }
}

/// A live foreign handle attached to a record value.
#[derive(Clone)]
pub struct ForeignBinding {
    pub type_name: String,
    pub handle: Arc<Mutex<Box<dyn ForeignStruct>>>,
}

impl fmt::Debug for ForeignBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBinding")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Convert a value into the generic JSON tree. Functions, channels, and
/// the internal sentinels have no tree form.
pub fn to_tree(value: &Value) -> Result<serde_json::Value, SprigError> {
    use serde_json::Value as Tree;
    Ok(match value {
        Value::Null => Tree::Null,
        Value::Bool(b) => Tree::Bool(*b),
        Value::Int(n) => Tree::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Tree::Number)
            .unwrap_or(Tree::Null),
        Value::Char(c) => Tree::String(c.to_string()),
        Value::Str(s) => Tree::String(s.clone()),
        Value::Symbol(s) => Tree::String(s.name.to_string()),
        Value::Time(t) => Tree::String(t.to_rfc3339()),
        Value::Pair(_) => {
            let items = value.list_items().ok_or_else(|| {
                SprigError::Type("cannot encode a dotted pair as JSON".into())
            })?;
            Tree::Array(items.iter().map(to_tree).collect::<Result<_, _>>()?)
        }
        Value::Array(a) => {
            let items = a.read().expect("array lock");
            Tree::Array(items.iter().map(to_tree).collect::<Result<_, _>>()?)
        }
        Value::Record(r) => {
            let rec = r.read().expect("record lock");
            let mut map = serde_json::Map::new();
            for (k, v) in rec.iter() {
                let key = match k {
                    Key::Str(s) => s.clone(),
                    other => other.to_value().display_pretty(),
                };
                map.insert(key, to_tree(v)?);
            }
            Tree::Object(map)
        }
        other => {
            return Err(SprigError::Type(format!(
                "cannot encode {} as JSON",
                other.type_name()
            )))
        }
    })
}

/// Convert a generic JSON tree into a value. Objects become untyped
/// records keyed by strings.
pub fn from_tree(tree: &serde_json::Value) -> Value {
    use serde_json::Value as Tree;
    match tree {
        Tree::Null => Value::Null,
        Tree::Bool(b) => Value::Bool(*b),
        Tree::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Tree::String(s) => Value::Str(s.clone()),
        Tree::Array(items) => Value::array(items.iter().map(from_tree).collect()),
        Tree::Object(map) => {
            let mut rec = Record::new();
            for (k, v) in map {
                rec.insert(Key::Str(k.clone()), from_tree(v));
            }
            Value::record(rec)
        }
    }
}

/// Materialize a host struct from a record via the registry and attach the
/// binding to the record. The record's declared type name selects the
/// factory unless `type_name` overrides it.
pub fn bind_record(
    registry: &StructRegistry,
    record: &Arc<std::sync::RwLock<Record>>,
    type_name: Option<&str>,
) -> Result<ForeignBinding, SprigError> {
    let name = match type_name {
        Some(n) => n.to_string(),
        None => record
            .read()
            .expect("record lock")
            .type_name
            .clone()
            .ok_or_else(|| SprigError::Type("record has no declared type name".into()))?,
    };
    let mut handle = registry.create(&name)?;
    let tree = to_tree(&Value::Record(record.clone()))?;
    handle
        .set_from_tree(&tree)
        .map_err(SprigError::Host)?;
    let binding = ForeignBinding {
        type_name: name,
        handle: Arc::new(Mutex::new(handle)),
    };
    record.write().expect("record lock").foreign = Some(binding.clone());
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl ForeignStruct for Point {
        fn type_name(&self) -> &str {
            "Point"
        }

        fn to_tree(&self) -> serde_json::Value {
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
        }

        fn set_from_tree(&mut self, tree: &serde_json::Value) -> Result<(), String> {
            self.x = tree["x"].as_i64().ok_or("missing x")?;
            self.y = tree["y"].as_i64().ok_or("missing y")?;
            Ok(())
        }

        fn field_tags(&self) -> Vec<(String, String)> {
            vec![("x".into(), "x".into()), ("y".into(), "y".into())]
        }
    }

    #[test]
    fn test_tree_roundtrip() {
        let v = Value::list([Value::Int(1), Value::str("two"), Value::Bool(true)]);
        let tree = to_tree(&v).unwrap();
        let back = from_tree(&tree);
        // lists come back as arrays through the generic tree
        assert_eq!(back.display_pretty(), "[1 \"two\" true]");
    }

    #[test]
    fn test_record_to_object_keeps_string_keys() {
        let mut rec = Record::new();
        rec.insert(Key::Str("name".into()), Value::str("sprig"));
        rec.insert(Key::Str("major".into()), Value::Int(0));
        let tree = to_tree(&Value::record(rec)).unwrap();
        assert_eq!(tree["name"], serde_json::json!("sprig"));
        assert_eq!(tree["major"], serde_json::json!(0));
    }

    #[test]
    fn test_function_has_no_tree_form() {
        use crate::symbols::intern;
        use crate::values::Function;
        let f = Value::Function(Arc::new(Function::native(intern("id"), |_, mut a| {
            Ok(a.pop().unwrap_or(Value::Null))
        })));
        assert!(to_tree(&f).unwrap_err().is_type());
    }

    #[test]
    fn test_bind_record_through_registry() {
        let mut registry = StructRegistry::new();
        registry.register("Point", || {
            Box::new(Point { x: 0, y: 0 }) as Box<dyn ForeignStruct>
        });
        let mut rec = Record::with_type("Point");
        rec.insert(Key::Str("x".into()), Value::Int(3));
        rec.insert(Key::Str("y".into()), Value::Int(4));
        let rec = Arc::new(std::sync::RwLock::new(rec));
        let binding = bind_record(&registry, &rec, None).unwrap();
        let handle = binding.handle.lock().unwrap();
        assert_eq!(handle.to_tree()["x"], serde_json::json!(3));
        assert_eq!(handle.to_tree()["y"], serde_json::json!(4));
        assert!(rec.read().unwrap().foreign.is_some());
    }

    #[test]
    fn test_unregistered_type_is_lookup_error() {
        let registry = StructRegistry::new();
        assert!(registry.create("Nope").unwrap_err().is_lookup());
    }
}
