//! Arithmetic and comparison natives with int/float promotion.

use std::cmp::Ordering;

use super::{register, want, want_at_least};
use crate::error::SprigError;
use crate::interp::Interp;
use crate::values::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// Integer pairs stay integral, except that inexact division promotes to
/// float. Any float operand promotes the whole operation.
fn numeric(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, SprigError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match op {
            BinaryOp::Add => Ok(Value::Int(x.wrapping_add(*y))),
            BinaryOp::Sub => Ok(Value::Int(x.wrapping_sub(*y))),
            BinaryOp::Mul => Ok(Value::Int(x.wrapping_mul(*y))),
            BinaryOp::Div => {
                if *y == 0 {
                    Err(SprigError::Type("division by zero".into()))
                } else if x % y == 0 {
                    Ok(Value::Int(x / y))
                } else {
                    Ok(Value::Float(*x as f64 / *y as f64))
                }
            }
            BinaryOp::Mod => {
                if *y == 0 {
                    Err(SprigError::Type("modulo by zero".into()))
                } else {
                    Ok(Value::Int(x.wrapping_rem(*y)))
                }
            }
        },
        _ => {
            let (x, y) = match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(SprigError::Type(format!(
                        "cannot apply `{}` to {} and {}",
                        op.name(),
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            match op {
                BinaryOp::Add => Ok(Value::Float(x + y)),
                BinaryOp::Sub => Ok(Value::Float(x - y)),
                BinaryOp::Mul => Ok(Value::Float(x * y)),
                BinaryOp::Div => {
                    if y == 0.0 {
                        Err(SprigError::Type("division by zero".into()))
                    } else {
                        Ok(Value::Float(x / y))
                    }
                }
                BinaryOp::Mod => Err(SprigError::Type(
                    "`%` is only defined on integers".into(),
                )),
            }
        }
    }
}

fn fold(op: BinaryOp, unit: Value, args: Vec<Value>) -> Result<Value, SprigError> {
    let mut iter = args.into_iter();
    let mut acc = match iter.next() {
        Some(first) => first,
        None => return Ok(unit),
    };
    for v in iter {
        acc = numeric(op, &acc, &v)?;
    }
    Ok(acc)
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, SprigError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Char(x), Value::Char(y)) => Ok(x.cmp(y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                SprigError::Type("NaN is not ordered".into())
            }),
            _ => Err(SprigError::Type(format!(
                "cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn chain(
    name: &str,
    args: &[Value],
    accept: impl Fn(Ordering) -> bool,
) -> Result<Value, SprigError> {
    want_at_least(name, args, 2)?;
    for pair in args.windows(2) {
        if !accept(compare(&pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn install(interp: &mut Interp) {
    register(interp, "+", |_, args| fold(BinaryOp::Add, Value::Int(0), args));
    register(interp, "*", |_, args| fold(BinaryOp::Mul, Value::Int(1), args));
    register(interp, "-", |_, args| {
        want_at_least("-", &args, 1)?;
        if args.len() == 1 {
            return numeric(BinaryOp::Sub, &Value::Int(0), &args[0]);
        }
        fold(BinaryOp::Sub, Value::Int(0), args)
    });
    register(interp, "/", |_, args| {
        want_at_least("/", &args, 2)?;
        fold(BinaryOp::Div, Value::Int(1), args)
    });
    register(interp, "%", |_, args| {
        want("%", &args, 2)?;
        numeric(BinaryOp::Mod, &args[0], &args[1])
    });
    register(interp, "==", |_, args| {
        want("==", &args, 2)?;
        Ok(Value::Bool(args[0] == args[1]))
    });
    register(interp, "!=", |_, args| {
        want("!=", &args, 2)?;
        Ok(Value::Bool(args[0] != args[1]))
    });
    register(interp, "<", |_, args| chain("<", &args, Ordering::is_lt));
    register(interp, "<=", |_, args| chain("<=", &args, Ordering::is_le));
    register(interp, ">", |_, args| chain(">", &args, Ordering::is_gt));
    register(interp, ">=", |_, args| chain(">=", &args, Ordering::is_ge));
    register(interp, "not", |_, args| {
        want("not", &args, 1)?;
        Ok(Value::Bool(!args[0].is_truthy()))
    });
}
