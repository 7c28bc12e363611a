//! Native procedures installed into the global scope.
//!
//! Builtins are ordinary function values bound in the global scope and
//! additionally tracked in the builtin table so the compiler can reject
//! rebinding their names.

pub mod arith;
pub mod chan;
pub mod core;

use std::sync::Arc;

use crate::error::SprigError;
use crate::interp::Interp;
use crate::symbols;
use crate::values::{Function, NativeFn, Value};

pub fn install(interp: &mut Interp) {
    arith::install(interp);
    core::install(interp);
    chan::install(interp);
}

pub(crate) fn register(interp: &mut Interp, name: &str, f: NativeFn) {
    let sym = symbols::intern(name);
    let func = Arc::new(Function::native(sym.clone(), f));
    interp
        .builtins
        .write()
        .expect("builtin table lock")
        .insert(sym.id, func.clone());
    interp
        .global
        .write()
        .expect("global scope lock")
        .bind(sym.id, Value::Function(func));
}

pub(crate) fn register_builder(interp: &mut Interp, name: &str, f: NativeFn) {
    let sym = symbols::intern(name);
    let func = Arc::new(Function::builder(sym.clone(), f));
    interp
        .builtins
        .write()
        .expect("builtin table lock")
        .insert(sym.id, func.clone());
    interp
        .global
        .write()
        .expect("global scope lock")
        .bind(sym.id, Value::Function(func));
}

pub(crate) fn want(name: &str, args: &[Value], n: usize) -> Result<(), SprigError> {
    if args.len() != n {
        return Err(SprigError::Arity(format!(
            "`{}` expects {}, got {}",
            name,
            n,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn want_at_least(name: &str, args: &[Value], n: usize) -> Result<(), SprigError> {
    if args.len() < n {
        return Err(SprigError::Arity(format!(
            "`{}` expects at least {}, got {}",
            name,
            n,
            args.len()
        )));
    }
    Ok(())
}
