//! List, array, record, string, and miscellaneous natives.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use super::{register, register_builder, want, want_at_least};
use crate::error::SprigError;
use crate::interop;
use crate::interp::{Interp, RecordType};
use crate::record::{Key, Record};
use crate::values::Value;

fn type_error(expected: &str, got: &Value) -> SprigError {
    SprigError::Type(format!("expected {}, got {}", expected, got.type_name()))
}

fn record_key(v: &Value) -> Result<Key, SprigError> {
    Key::from_value(v)
}

fn as_record(v: &Value) -> Result<&Arc<std::sync::RwLock<Record>>, SprigError> {
    match v {
        Value::Record(r) => Ok(r),
        other => Err(type_error("a record", other)),
    }
}

fn as_array(v: &Value) -> Result<&Arc<std::sync::RwLock<Vec<Value>>>, SprigError> {
    match v {
        Value::Array(a) => Ok(a),
        other => Err(type_error("an array", other)),
    }
}

fn index_of(v: &Value, len: usize) -> Result<usize, SprigError> {
    let i = v.as_int().ok_or_else(|| type_error("an integer index", v))?;
    if i < 0 || i as usize >= len {
        return Err(SprigError::Lookup(format!(
            "index {} out of bounds for length {}",
            i, len
        )));
    }
    Ok(i as usize)
}

fn print_args(interp: &mut Interp, args: Vec<Value>, newline: bool) -> Value {
    let text = args
        .iter()
        .map(|v| v.display_pretty())
        .collect::<Vec<_>>()
        .join(" ");
    if newline {
        println!("{}", text);
    } else {
        print!("{}", text);
    }
    interp.output.push(text);
    Value::Null
}

pub fn install(interp: &mut Interp) {
    // pairs and lists
    register(interp, "cons", |_, args| {
        want("cons", &args, 2)?;
        Ok(Value::cons(args[0].clone(), args[1].clone()))
    });
    register(interp, "car", |_, args| {
        want("car", &args, 1)?;
        match &args[0] {
            Value::Pair(p) => Ok(p.head.clone()),
            other => Err(type_error("a pair", other)),
        }
    });
    register(interp, "cdr", |_, args| {
        want("cdr", &args, 1)?;
        match &args[0] {
            Value::Pair(p) => Ok(p.tail.clone()),
            other => Err(type_error("a pair", other)),
        }
    });
    register(interp, "list", |_, args| Ok(Value::list(args)));
    register(interp, "append", |_, args| {
        let mut out = Vec::new();
        for arg in &args {
            out.extend(
                arg.list_items()
                    .ok_or_else(|| type_error("a list", arg))?,
            );
        }
        Ok(Value::list(out))
    });
    register(interp, "nth", |_, args| {
        want("nth", &args, 2)?;
        match &args[0] {
            Value::Array(a) => {
                let items = a.read().expect("array lock");
                let i = index_of(&args[1], items.len())?;
                Ok(items[i].clone())
            }
            list => {
                let items = list
                    .list_items()
                    .ok_or_else(|| type_error("a list or array", list))?;
                let i = index_of(&args[1], items.len())?;
                Ok(items[i].clone())
            }
        }
    });
    register(interp, "reverse", |_, args| {
        want("reverse", &args, 1)?;
        match &args[0] {
            Value::Array(a) => {
                let mut items = a.read().expect("array lock").clone();
                items.reverse();
                Ok(Value::array(items))
            }
            list => {
                let mut items = list
                    .list_items()
                    .ok_or_else(|| type_error("a list or array", list))?;
                items.reverse();
                Ok(Value::list(items))
            }
        }
    });
    register(interp, "len", |_, args| {
        want("len", &args, 1)?;
        let n = match &args[0] {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Array(a) => a.read().expect("array lock").len(),
            Value::Record(r) => r.read().expect("record lock").len(),
            list => list
                .list_items()
                .ok_or_else(|| type_error("a sequence", list))?
                .len(),
        };
        Ok(Value::Int(n as i64))
    });

    // arrays
    register(interp, "array", |_, args| Ok(Value::array(args)));
    register(interp, "aget", |_, args| {
        want("aget", &args, 2)?;
        let arr = as_array(&args[0])?.read().expect("array lock");
        let i = index_of(&args[1], arr.len())?;
        Ok(arr[i].clone())
    });
    register(interp, "aset!", |_, args| {
        want("aset!", &args, 3)?;
        let arr = as_array(&args[0])?;
        let mut items = arr.write().expect("array lock");
        let i = index_of(&args[1], items.len())?;
        items[i] = args[2].clone();
        Ok(args[0].clone())
    });
    register(interp, "apush!", |_, args| {
        want("apush!", &args, 2)?;
        as_array(&args[0])?
            .write()
            .expect("array lock")
            .push(args[1].clone());
        Ok(args[0].clone())
    });

    // records
    register(interp, "hash", |_, args| {
        if args.len() % 2 != 0 {
            return Err(SprigError::Arity(
                "`hash` expects key/value pairs".into(),
            ));
        }
        let mut rec = Record::new();
        for pair in args.chunks(2) {
            rec.insert(record_key(&pair[0])?, pair[1].clone());
        }
        Ok(Value::record(rec))
    });
    register(interp, "hget", |_, args| {
        want_at_least("hget", &args, 2)?;
        if args.len() > 3 {
            return Err(SprigError::Arity(format!(
                "`hget` expects 2 or 3, got {}",
                args.len()
            )));
        }
        let rec = as_record(&args[0])?.read().expect("record lock");
        match rec.get(&record_key(&args[1])?) {
            Some(v) => Ok(v.clone()),
            None => match args.get(2) {
                Some(default) => Ok(default.clone()),
                None => Err(SprigError::Lookup(format!(
                    "record key {}",
                    args[1].display_pretty()
                ))),
            },
        }
    });
    register(interp, "hset!", |_, args| {
        want("hset!", &args, 3)?;
        as_record(&args[0])?
            .write()
            .expect("record lock")
            .insert(record_key(&args[1])?, args[2].clone());
        Ok(args[0].clone())
    });
    register(interp, "hdel!", |_, args| {
        want("hdel!", &args, 2)?;
        as_record(&args[0])?
            .write()
            .expect("record lock")
            .remove(&record_key(&args[1])?);
        Ok(args[0].clone())
    });
    register(interp, "hhas?", |_, args| {
        want("hhas?", &args, 2)?;
        let rec = as_record(&args[0])?.read().expect("record lock");
        Ok(Value::Bool(rec.contains(&record_key(&args[1])?)))
    });
    register(interp, "keys", |_, args| {
        want("keys", &args, 1)?;
        let rec = as_record(&args[0])?.read().expect("record lock");
        Ok(Value::list(rec.keys().map(|k| k.to_value())))
    });
    register(interp, "vals", |_, args| {
        want("vals", &args, 1)?;
        let rec = as_record(&args[0])?.read().expect("record lock");
        Ok(Value::list(rec.iter().map(|(_, v)| v.clone())))
    });

    // strings, symbols, bytes
    register(interp, "str", |_, args| {
        Ok(Value::Str(
            args.iter().map(|v| v.display_pretty()).collect::<String>(),
        ))
    });
    register(interp, "sym->str", |_, args| {
        want("sym->str", &args, 1)?;
        match &args[0] {
            Value::Symbol(s) => Ok(Value::Str(s.name.to_string())),
            other => Err(type_error("a symbol", other)),
        }
    });
    register(interp, "str->sym", |_, args| {
        want("str->sym", &args, 1)?;
        match &args[0] {
            Value::Str(s) => Ok(Value::sym(s)),
            other => Err(type_error("a string", other)),
        }
    });
    register(interp, "str->bytes", |_, args| {
        want("str->bytes", &args, 1)?;
        match &args[0] {
            Value::Str(s) => Ok(Value::Bytes(s.clone().into_bytes())),
            other => Err(type_error("a string", other)),
        }
    });
    register(interp, "bytes->str", |_, args| {
        want("bytes->str", &args, 1)?;
        match &args[0] {
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map(Value::Str)
                .map_err(|e| SprigError::Type(format!("invalid utf-8: {}", e))),
            other => Err(type_error("bytes", other)),
        }
    });

    // predicates
    register(interp, "null?", |_, args| {
        want("null?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Null)))
    });
    register(interp, "pair?", |_, args| {
        want("pair?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
    });
    register(interp, "list?", |_, args| {
        want("list?", &args, 1)?;
        Ok(Value::Bool(args[0].is_list()))
    });
    register(interp, "array?", |_, args| {
        want("array?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Array(_))))
    });
    register(interp, "hash?", |_, args| {
        want("hash?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Record(_))))
    });
    register(interp, "symbol?", |_, args| {
        want("symbol?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
    });
    register(interp, "string?", |_, args| {
        want("string?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Str(_))))
    });
    register(interp, "int?", |_, args| {
        want("int?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Int(_))))
    });
    register(interp, "float?", |_, args| {
        want("float?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Float(_))))
    });
    register(interp, "number?", |_, args| {
        want("number?", &args, 1)?;
        Ok(Value::Bool(matches!(
            args[0],
            Value::Int(_) | Value::Float(_)
        )))
    });
    register(interp, "bool?", |_, args| {
        want("bool?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
    });
    register(interp, "char?", |_, args| {
        want("char?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Char(_))))
    });
    register(interp, "fn?", |_, args| {
        want("fn?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Function(_))))
    });
    register(interp, "chan?", |_, args| {
        want("chan?", &args, 1)?;
        Ok(Value::Bool(matches!(args[0], Value::Channel(_))))
    });
    register(interp, "type", |_, args| {
        want("type", &args, 1)?;
        Ok(Value::Str(args[0].type_name().to_string()))
    });

    // printing
    register(interp, "print", |interp, args| {
        Ok(print_args(interp, args, false))
    });
    register(interp, "println", |interp, args| {
        Ok(print_args(interp, args, true))
    });

    // pointers
    register(interp, "ref", |_, args| {
        want("ref", &args, 1)?;
        Ok(Value::Pointer(Arc::new(std::sync::RwLock::new(
            args[0].clone(),
        ))))
    });
    register(interp, "deref", |_, args| {
        want("deref", &args, 1)?;
        match &args[0] {
            Value::Pointer(p) => Ok(p.read().expect("pointer lock").clone()),
            other => Err(type_error("a pointer", other)),
        }
    });
    register(interp, "ptr-set!", |_, args| {
        want("ptr-set!", &args, 2)?;
        match &args[0] {
            Value::Pointer(p) => {
                *p.write().expect("pointer lock") = args[1].clone();
                Ok(args[1].clone())
            }
            other => Err(type_error("a pointer", other)),
        }
    });

    // time and regular expressions
    register(interp, "now", |_, args| {
        want("now", &args, 0)?;
        Ok(Value::Time(Utc::now()))
    });
    register(interp, "regexp", |_, args| {
        want("regexp", &args, 1)?;
        match &args[0] {
            Value::Str(s) => Regex::new(s)
                .map(|r| Value::Regexp(Arc::new(r)))
                .map_err(|e| SprigError::Type(format!("bad pattern: {}", e))),
            other => Err(type_error("a pattern string", other)),
        }
    });
    register(interp, "re-match", |_, args| {
        want("re-match", &args, 2)?;
        match (&args[0], &args[1]) {
            (Value::Regexp(re), Value::Str(s)) => Ok(Value::Bool(re.is_match(s))),
            (a, b) => Err(SprigError::Type(format!(
                "`re-match` needs a regexp and a string, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    });
    register(interp, "re-find", |_, args| {
        want("re-find", &args, 2)?;
        match (&args[0], &args[1]) {
            (Value::Regexp(re), Value::Str(s)) => Ok(re
                .find(s)
                .map(|m| Value::Str(m.as_str().to_string()))
                .unwrap_or(Value::Null)),
            (a, b) => Err(SprigError::Type(format!(
                "`re-find` needs a regexp and a string, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    });

    // json through the generic interop tree
    register(interp, "json-encode", |_, args| {
        want("json-encode", &args, 1)?;
        let tree = interop::to_tree(&args[0])?;
        serde_json::to_string(&tree)
            .map(Value::Str)
            .map_err(|e| SprigError::Host(e.to_string()))
    });
    register(interp, "json-decode", |_, args| {
        want("json-decode", &args, 1)?;
        match &args[0] {
            Value::Str(s) => {
                let tree: serde_json::Value = serde_json::from_str(s)
                    .map_err(|e| SprigError::Syntax(format!("bad json: {}", e)))?;
                Ok(interop::from_tree(&tree))
            }
            other => Err(type_error("a json string", other)),
        }
    });

    // host binding
    register(interp, "to-host", |interp, args| {
        want("to-host", &args, 1)?;
        let rec = as_record(&args[0])?;
        let registry = interp.registry.read().expect("registry lock").clone();
        interop::bind_record(&registry, rec, None)?;
        Ok(args[0].clone())
    });

    // higher-order
    register(interp, "apply", |interp, args| {
        want("apply", &args, 2)?;
        let func = args[0]
            .as_function()
            .ok_or_else(|| type_error("a function", &args[0]))?
            .clone();
        let call_args = args[1]
            .list_items()
            .ok_or_else(|| type_error("an argument list", &args[1]))?;
        interp.apply(&func, call_args)
    });
    register(interp, "map", |interp, args| {
        want("map", &args, 2)?;
        let func = args[0]
            .as_function()
            .ok_or_else(|| type_error("a function", &args[0]))?
            .clone();
        let items = match &args[1] {
            Value::Array(a) => a.read().expect("array lock").clone(),
            list => list
                .list_items()
                .ok_or_else(|| type_error("a list or array", list))?,
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(interp.apply(&func, vec![item])?);
        }
        Ok(Value::list(out))
    });
    register(interp, "range", |_, args| {
        want_at_least("range", &args, 1)?;
        let (start, end) = match args.len() {
            1 => (0, args[0].as_int().ok_or_else(|| type_error("an integer", &args[0]))?),
            2 => (
                args[0].as_int().ok_or_else(|| type_error("an integer", &args[0]))?,
                args[1].as_int().ok_or_else(|| type_error("an integer", &args[1]))?,
            ),
            n => {
                return Err(SprigError::Arity(format!(
                    "`range` expects 1 or 2, got {}",
                    n
                )))
            }
        };
        Ok(Value::list((start..end).map(Value::Int)))
    });

    // diagnostics
    register(interp, "macexpand", |interp, args| {
        want("macexpand", &args, 1)?;
        let Some(items) = args[0].list_items() else {
            return Ok(args[0].clone());
        };
        let Some((Value::Symbol(head), rest)) = items.split_first().map(|(h, r)| (h.clone(), r))
        else {
            return Ok(args[0].clone());
        };
        let mac = interp
            .macros
            .read()
            .expect("macro table lock")
            .get(&head.id)
            .cloned();
        match mac {
            Some(mac) => {
                let mut iso = interp.duplicate();
                iso.apply(&mac, rest.to_vec())
            }
            None => Ok(args[0].clone()),
        }
    });
    register(interp, "disasm", |interp, args| {
        want("disasm", &args, 1)?;
        let func = args[0]
            .as_function()
            .ok_or_else(|| type_error("a function", &args[0]))?;
        Ok(Value::Str(interp.dump_instructions(func)))
    });

    // record type declarations; a builder sees its argument forms as
    // written, so the field names arrive unevaluated
    register_builder(interp, "defrecord", |interp, args| {
        want_at_least("defrecord", &args, 2)?;
        let name = match &args[0] {
            Value::Symbol(s) => s.clone(),
            other => return Err(type_error("a type name symbol", other)),
        };
        let fields = match &args[1] {
            Value::Array(a) => a.read().expect("array lock").clone(),
            other => return Err(type_error("a field array", other)),
        };
        let mut field_syms = Vec::with_capacity(fields.len());
        for f in &fields {
            match f {
                Value::Symbol(s) => field_syms.push(s.clone()),
                other => return Err(type_error("a field name symbol", other)),
            }
        }
        interp.types.write().expect("type table lock").insert(
            name.id,
            Arc::new(RecordType {
                name: name.clone(),
                fields: field_syms,
            }),
        );
        Ok(Value::Symbol(name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Value {
        Interp::new().eval(src).unwrap()
    }

    #[test]
    fn test_list_primitives() {
        assert_eq!(eval("(car (cons 1 2))"), Value::Int(1));
        assert_eq!(eval("(cdr (cons 1 2))"), Value::Int(2));
        assert_eq!(eval("(len (list 1 2 3))"), Value::Int(3));
        assert_eq!(eval("(nth (list 10 20 30) 1)"), Value::Int(20));
    }

    #[test]
    fn test_array_mutation_shares_storage() {
        assert_eq!(
            eval("(let [a [1 2 3]] (aset! a 0 9) (aget a 0))"),
            Value::Int(9)
        );
    }

    #[test]
    fn test_index_out_of_bounds_is_lookup_error() {
        let err = Interp::new().eval("(aget [1] 5)").unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_hash_access_and_default() {
        assert_eq!(eval("(hget {\"a\" 1} \"a\")"), Value::Int(1));
        assert_eq!(eval("(hget {\"a\" 1} \"b\" 0)"), Value::Int(0));
        let err = Interp::new().eval("(hget {\"a\" 1} \"b\")").unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_str_concatenation() {
        assert_eq!(eval("(str \"a\" 1 \"b\")"), Value::str("a1b"));
    }

    #[test]
    fn test_map_over_list() {
        assert_eq!(
            eval("(map (fn [x] (* x x)) (list 1 2 3))").display_pretty(),
            "(1 4 9)"
        );
    }

    #[test]
    fn test_json_roundtrip() {
        assert_eq!(
            eval("(json-decode (json-encode {\"n\" 3}))").display_pretty(),
            "{\"n\" 3}"
        );
    }

    #[test]
    fn test_defrecord_constructor() {
        assert_eq!(
            eval("(defrecord point [x y]) (let [p (point 1 2)] (hget p 'x))"),
            Value::Int(1)
        );
    }

    #[test]
    fn test_dot_path_reads_record_field() {
        assert_eq!(
            eval("(defrecord pt [x y]) (def p (pt 3 4)) p.x"),
            Value::Int(3)
        );
    }

    #[test]
    fn test_println_captures_output() {
        let mut interp = Interp::new();
        interp.eval("(println \"hi\" 42)").unwrap();
        assert_eq!(interp.output, vec!["hi 42".to_string()]);
    }

    #[test]
    fn test_pointer_cell() {
        assert_eq!(
            eval("(let [p (ref 1)] (ptr-set! p 5) (deref p))"),
            Value::Int(5)
        );
    }

    #[test]
    fn test_regex_match() {
        assert_eq!(eval("(re-match (regexp \"^a+$\") \"aaa\")"), Value::Bool(true));
        assert_eq!(eval("(re-find (regexp \"[0-9]+\") \"ab12cd\")"), Value::str("12"));
    }
}
