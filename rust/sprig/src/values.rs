//! Tagged value representation: the universal currency of the interpreter.
//!
//! Mutable containers (arrays, records, pointers) are shared by reference
//! through `Arc<RwLock<…>>`, so a value handed to a duplicated interpreter
//! instance aliases the same storage as the original. Pairs are immutable.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::channel::Channel;
use crate::error::SprigError;
use crate::record::Record;
use crate::symbols::Symbol;

/// Runtime values.
#[derive(Debug, Clone)]
pub enum Value {
    /// The empty list; also the "no value" result of pure statements.
    Null,
    /// End-of-stream sentinel (reader exhaustion, closed channels).
    End,
    /// Internal list-splice marker bracketing quasiquote rebuilds.
    Marker,
    /// Named unwind sentinel bounding one loop iteration's stack use.
    Stackmark(Symbol),
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    Symbol(Symbol),
    Pair(Arc<Pair>),
    Array(Arc<RwLock<Vec<Value>>>),
    Record(Arc<RwLock<Record>>),
    Function(Arc<Function>),
    Pointer(Arc<RwLock<Value>>),
    Channel(Channel),
    Time(DateTime<Utc>),
    Regexp(Arc<Regex>),
}

/// A cons cell. Proper lists are `Null`-terminated chains of pairs.
#[derive(Debug, Clone)]
pub struct Pair {
    pub head: Value,
    pub tail: Value,
}

/// Native procedures receive the calling interpreter and their popped
/// arguments in declaration order.
pub type NativeFn = fn(&mut crate::interp::Interp, Vec<Value>) -> Result<Value, SprigError>;

#[derive(Clone)]
pub enum FunctionKind {
    Compiled {
        body: Arc<Vec<crate::bytecode::Instruction>>,
        nargs: usize,
        varargs: bool,
        /// The originating source form, kept for `macexpand` and dumps.
        source: Value,
    },
    Native(NativeFn),
}

/// A callable value. The closure snapshot is attached exactly once, when
/// the function value is produced; cloning never re-snapshots.
#[derive(Clone)]
pub struct Function {
    pub name: Symbol,
    pub kind: FunctionKind,
    pub closure: Option<crate::closure::Closure>,
    /// Builders receive their call-site argument forms unevaluated.
    pub is_builder: bool,
}

impl Function {
    pub fn native(name: Symbol, f: NativeFn) -> Self {
        Function {
            name,
            kind: FunctionKind::Native(f),
            closure: None,
            is_builder: false,
        }
    }

    pub fn builder(name: Symbol, f: NativeFn) -> Self {
        Function {
            name,
            kind: FunctionKind::Native(f),
            closure: None,
            is_builder: true,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native(_))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FunctionKind::Native(_) => write!(f, "Function(native {})", self.name),
            FunctionKind::Compiled { nargs, varargs, .. } => write!(
                f,
                "Function({} nargs={}{})",
                self.name,
                nargs,
                if *varargs { " variadic" } else { "" }
            ),
        }
    }
}

impl Value {
    /// Build a proper list from values.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        let mut out = Value::Null;
        for item in items.into_iter().rev() {
            out = Value::Pair(Arc::new(Pair {
                head: item,
                tail: out,
            }));
        }
        out
    }

    pub fn cons(head: Value, tail: Value) -> Value {
        Value::Pair(Arc::new(Pair { head, tail }))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn record(rec: Record) -> Value {
        Value::Record(Arc::new(RwLock::new(rec)))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn sym(s: &str) -> Value {
        Value::Symbol(crate::symbols::intern(s))
    }

    /// Flatten a `Null`-terminated pair chain. Returns `None` for dotted
    /// (improper) lists and non-lists.
    pub fn list_items(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cur = self.clone();
        loop {
            match cur {
                Value::Null => return Some(items),
                Value::Pair(p) => {
                    items.push(p.head.clone());
                    cur = p.tail.clone();
                }
                _ => return None,
            }
        }
    }

    /// Only `false` and the empty list are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::Null | Value::Pair(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::End => "end",
            Value::Marker => "marker",
            Value::Stackmark(_) => "stackmark",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Function(_) => "function",
            Value::Pointer(_) => "pointer",
            Value::Channel(_) => "channel",
            Value::Time(_) => "time",
            Value::Regexp(_) => "regexp",
        }
    }

    /// Pretty display for user-facing output: strings appear bare.
    pub fn display_pretty(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            _ => self.display_quoted(),
        }
    }

    /// Display with quotes for strings (used inside containers).
    pub(crate) fn display_quoted(&self) -> String {
        match self {
            Value::Null => "()".to_string(),
            Value::End => "#end".to_string(),
            Value::Marker => "#marker".to_string(),
            Value::Stackmark(sym) => format!("#mark<{}>", sym),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Char(c) => format!("#\\{}", char_name(*c)),
            Value::Str(s) => format!("{:?}", s),
            Value::Bytes(b) => format!("#bytes<{}>", b.len()),
            Value::Symbol(s) => s.to_string(),
            Value::Pair(p) => match self.list_items() {
                Some(items) => {
                    let inner: Vec<String> = items.iter().map(|v| v.display_quoted()).collect();
                    format!("({})", inner.join(" "))
                }
                None => format!(
                    "({} . {})",
                    p.head.display_quoted(),
                    p.tail.display_quoted()
                ),
            },
            Value::Array(a) => {
                let items = a.read().expect("array lock");
                let inner: Vec<String> = items.iter().map(|v| v.display_quoted()).collect();
                format!("[{}]", inner.join(" "))
            }
            Value::Record(r) => r.read().expect("record lock").display(),
            Value::Function(f) => format!("#fn<{}>", f.name),
            Value::Pointer(p) => {
                format!("#ptr<{}>", p.read().expect("pointer lock").display_quoted())
            }
            Value::Channel(_) => "#channel".to_string(),
            Value::Time(t) => t.to_rfc3339(),
            Value::Regexp(r) => format!("#regexp<{}>", r.as_str()),
        }
    }
}

fn format_float(f: f64) -> String {
    if f == f.floor() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn char_name(c: char) -> String {
    match c {
        '\n' => "newline".to_string(),
        '\t' => "tab".to_string(),
        ' ' => "space".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_pretty())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::End, Value::End) => true,
            (Value::Marker, Value::Marker) => true,
            (Value::Stackmark(a), Value::Stackmark(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => a.head == b.head && a.tail == b.tail,
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || *a.read().expect("array lock") == *b.read().expect("array lock")
            }
            (Value::Record(a), Value::Record(b)) => {
                Arc::ptr_eq(a, b)
                    || *a.read().expect("record lock") == *b.read().expect("record lock")
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Pointer(a), Value::Pointer(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => a.same_channel(b),
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Regexp(a), Value::Regexp(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}
