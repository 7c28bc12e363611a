//! The execution engine: a fetch-execute loop over bytecode.
//!
//! The engine mutates four stacks: data, return-address, lexical-scope,
//! and loop. Break, continue, and return are instruction-pointer
//! redirection, never unwinding exceptions; errors abort the current run
//! and are reported to the caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::bytecode::{CachedTarget, Instruction, Loop, SquashKind};
use crate::closure::Closure;
use crate::error::SprigError;
use crate::interp::{Frame, Interp};
use crate::record::{Key, Record};
use crate::scope::{self, Scope};
use crate::symbols::{self, Symbol};
use crate::values::{Function, FunctionKind, Value};

const MAX_CALL_DEPTH: usize = 1024;

enum LoopExit {
    Break,
    Continue,
}

impl Interp {
    /// Run until a `Return` brings the return-address stack back down to
    /// `stop_depth`.
    pub(crate) fn exec_loop(&mut self, stop_depth: usize) -> Result<(), SprigError> {
        loop {
            let func = self
                .cur
                .clone()
                .ok_or_else(|| SprigError::Fault("no function executing".into()))?;
            let body = match &func.kind {
                FunctionKind::Compiled { body, .. } => body.clone(),
                FunctionKind::Native(_) => {
                    return Err(SprigError::Fault(
                        "native function entered the bytecode loop".into(),
                    ))
                }
            };
            let instr = body.get(self.ip).cloned().ok_or_else(|| {
                SprigError::Fault(format!(
                    "instruction pointer {} out of range in {}",
                    self.ip, func.name
                ))
            })?;
            match instr {
                Instruction::Push(v) => {
                    self.data.push(v);
                    self.ip += 1;
                }
                Instruction::Pop => {
                    self.data.pop()?;
                    self.ip += 1;
                }
                Instruction::Dup => {
                    let top = self
                        .data
                        .peek()
                        .cloned()
                        .ok_or_else(|| SprigError::Fault("stack underflow".into()))?;
                    self.data.push(top);
                    self.ip += 1;
                }
                Instruction::LoadSym(sym) => {
                    let v = self.load_symbol(&sym)?;
                    self.data.push(v);
                    self.ip += 1;
                }
                Instruction::StoreSym(sym) => {
                    let v = self.data.pop()?;
                    self.bind_current(&sym, v)?;
                    self.ip += 1;
                }
                Instruction::UpdateSym(sym) => {
                    let v = self.data.pop()?;
                    self.update_symbol(&sym, v)?;
                    self.ip += 1;
                }
                Instruction::StoreList(syms) => {
                    let v = self.data.pop()?;
                    let items = v.list_items().ok_or_else(|| {
                        SprigError::Type(format!(
                            "can only destructure a list, got {}",
                            v.type_name()
                        ))
                    })?;
                    if items.len() != syms.len() {
                        return Err(SprigError::Arity(format!(
                            "destructuring {} names from a list of {}",
                            syms.len(),
                            items.len()
                        )));
                    }
                    for (sym, item) in syms.iter().zip(items) {
                        self.bind_current(sym, item)?;
                    }
                    self.ip += 1;
                }
                Instruction::Call { sym, nargs } => self.call_symbol(&sym, nargs)?,
                Instruction::Dispatch { nargs } => {
                    let callee = self.data.pop()?;
                    match callee {
                        Value::Function(f) => self.call_function(f, nargs)?,
                        other => {
                            return Err(SprigError::Type(format!(
                                "cannot call a {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                Instruction::Branch { when, offset } => {
                    let cond = self.data.pop()?;
                    if cond.is_truthy() == when {
                        self.jump_rel(offset, body.len())?;
                    } else {
                        self.ip += 1;
                    }
                }
                Instruction::Jump { offset } => self.jump_rel(offset, body.len())?,
                Instruction::Goto(target) => {
                    if target >= body.len() {
                        return Err(SprigError::Fault(format!(
                            "goto target {} out of range",
                            target
                        )));
                    }
                    self.ip = target;
                }
                Instruction::AddScope => {
                    self.scopes.push(Scope::new("let"));
                    self.ip += 1;
                }
                Instruction::AddFuncScope { name } => {
                    self.scopes.push(Scope::function(name.to_string()));
                    self.ip += 1;
                }
                Instruction::RemoveScope => {
                    self.pop_scope()?;
                    self.ip += 1;
                }
                Instruction::RemoveScopes(n) => {
                    for _ in 0..n {
                        self.pop_scope()?;
                    }
                    self.ip += 1;
                }
                Instruction::Return(Some(msg)) => {
                    return Err(SprigError::Assert(msg));
                }
                Instruction::Return(None) => {
                    self.unwind_function_scopes()?;
                    if self.frames.len() == stop_depth {
                        return Ok(());
                    }
                    let frame = self.frames.pop()?;
                    self.loops.truncate(frame.loop_depth);
                    self.cur = Some(frame.function);
                    self.ip = frame.pos;
                }
                Instruction::CreateClosure(template) => {
                    let mut func = (*template).clone();
                    func.closure = Some(Closure::capture(self.scopes.live()));
                    self.data.push(Value::Function(Arc::new(func)));
                    self.ip += 1;
                }
                Instruction::LoopStart(l) => {
                    self.loops.push(l);
                    self.ip += 1;
                }
                Instruction::LoopEnd => {
                    self.loops.pop()?;
                    self.ip += 1;
                }
                Instruction::Break {
                    target,
                    scopes,
                    cache,
                } => self.exec_loop_exit(&body[..], target, scopes, cache, LoopExit::Break)?,
                Instruction::Continue {
                    target,
                    scopes,
                    cache,
                } => self.exec_loop_exit(&body[..], target, scopes, cache, LoopExit::Continue)?,
                Instruction::PushStackmark(sym) => {
                    self.data.push(Value::Stackmark(sym));
                    self.ip += 1;
                }
                Instruction::PopUntilStackmark(sym) => {
                    self.pop_to_mark(&sym)?;
                    self.ip += 1;
                }
                Instruction::ClearStackmark(sym) => {
                    let mut kept = Vec::new();
                    loop {
                        match self.data.pop()? {
                            Value::Stackmark(s) if s == sym => break,
                            other => kept.push(other),
                        }
                    }
                    for v in kept.into_iter().rev() {
                        self.data.push(v);
                    }
                    self.ip += 1;
                }
                Instruction::PushMarker => {
                    self.data.push(Value::Marker);
                    self.ip += 1;
                }
                Instruction::Explode => {
                    let v = self.data.pop()?;
                    match &v {
                        Value::Null => {}
                        Value::Pair(_) => {
                            let items = v.list_items().ok_or_else(|| {
                                SprigError::Type("cannot splice a dotted pair".into())
                            })?;
                            for item in items {
                                self.data.push(item);
                            }
                        }
                        Value::Array(a) => {
                            let items = a.read().expect("array lock").clone();
                            for item in items {
                                self.data.push(item);
                            }
                        }
                        other => {
                            return Err(SprigError::Type(format!(
                                "cannot splice a {}",
                                other.type_name()
                            )))
                        }
                    }
                    self.ip += 1;
                }
                Instruction::Squash(kind) => {
                    let mut items = Vec::new();
                    loop {
                        match self.data.pop()? {
                            Value::Marker => break,
                            v => items.push(v),
                        }
                    }
                    items.reverse();
                    let value = match kind {
                        SquashKind::List => Value::list(items),
                        SquashKind::Array => Value::array(items),
                        SquashKind::Hash => {
                            if items.len() % 2 != 0 {
                                return Err(SprigError::Type(
                                    "hash literal needs an even number of elements".into(),
                                ));
                            }
                            let mut rec = Record::new();
                            for pair in items.chunks(2) {
                                rec.insert(Key::from_value(&pair[0])?, pair[1].clone());
                            }
                            Value::record(rec)
                        }
                    };
                    self.data.push(value);
                    self.ip += 1;
                }
            }
        }
    }

    /// Apply a function to already-evaluated arguments and return its
    /// result. Compiled callees run the bytecode loop to completion.
    pub fn apply(&mut self, func: &Arc<Function>, args: Vec<Value>) -> Result<Value, SprigError> {
        match &func.kind {
            FunctionKind::Native(native) => self.call_native(*native, args),
            FunctionKind::Compiled {
                nargs, varargs, ..
            } => {
                let provided = args.len();
                for arg in args {
                    self.data.push(arg);
                }
                self.collect_args(provided, *nargs, *varargs)?;
                let saved_cur = self.cur.take();
                let saved_ip = self.ip;
                let stop = self.frames.len();
                self.cur = Some(func.clone());
                self.ip = 0;
                let outcome = self.exec_loop(stop);
                self.cur = saved_cur;
                self.ip = saved_ip;
                outcome?;
                self.data.pop()
            }
        }
    }

    fn jump_rel(&mut self, offset: isize, body_len: usize) -> Result<(), SprigError> {
        let dest = self.ip as isize + offset;
        if dest < 0 || dest as usize >= body_len {
            return Err(SprigError::Fault(format!(
                "jump target {} out of range",
                dest
            )));
        }
        self.ip = dest as usize;
        Ok(())
    }

    fn pop_scope(&mut self) -> Result<(), SprigError> {
        if self.scopes.len() <= 1 {
            return Err(SprigError::Fault("cannot pop the global scope".into()));
        }
        self.scopes.pop()?;
        Ok(())
    }

    /// Pop scopes through the nearest call-frame boundary. The global
    /// scope is never popped.
    fn unwind_function_scopes(&mut self) -> Result<(), SprigError> {
        while self.scopes.len() > 1 {
            let popped = self.scopes.pop()?;
            if popped.read().expect("scope lock").is_function {
                break;
            }
        }
        Ok(())
    }

    fn bind_current(&mut self, sym: &Symbol, value: Value) -> Result<(), SprigError> {
        let current = self
            .scopes
            .peek()
            .cloned()
            .ok_or_else(|| SprigError::Fault("no scope to bind in".into()))?;
        current.write().expect("scope lock").bind(sym.id, value);
        Ok(())
    }

    /// Three-phase lexical lookup: the live stack walked through the
    /// nearest function boundary, then the current function's closure
    /// snapshot with the same bounded walk, then the global scope.
    pub(crate) fn load_symbol(&self, sym: &Symbol) -> Result<Value, SprigError> {
        if sym.is_dot {
            return self.load_dot_path(sym);
        }
        if let Some(v) = scope::lookup_bounded(self.scopes.live(), sym.id) {
            return Ok(v);
        }
        if let Some(closure) = self.cur.as_ref().and_then(|f| f.closure.as_ref()) {
            if let Some(v) = closure.lookup(sym.id) {
                return Ok(v);
            }
        }
        if let Some(v) = self.global.read().expect("global scope lock").get(sym.id) {
            return Ok(v);
        }
        Err(SprigError::Lookup(format!("symbol `{}`", sym)))
    }

    /// `set` semantics: rebind the nearest existing binding; when the
    /// name is unbound anywhere, fall back to defining it in the current
    /// scope. This mirrors the source language and never raises.
    fn update_symbol(&mut self, sym: &Symbol, value: Value) -> Result<(), SprigError> {
        if sym.is_dot {
            return self.store_dot_path(sym, value);
        }
        let holder = scope::find_scope_bounded(self.scopes.live(), sym.id)
            .or_else(|| {
                self.cur
                    .as_ref()
                    .and_then(|f| f.closure.as_ref())
                    .and_then(|c| c.find_scope(sym.id))
            })
            .or_else(|| {
                if self
                    .global
                    .read()
                    .expect("global scope lock")
                    .contains(sym.id)
                {
                    Some(self.global.clone())
                } else {
                    None
                }
            });
        match holder {
            Some(scope) => {
                scope.write().expect("scope lock").bind(sym.id, value);
                Ok(())
            }
            None => self.bind_current(sym, value),
        }
    }

    fn dot_segments(sym: &Symbol) -> Vec<String> {
        sym.name.split('.').map(|s| s.to_string()).collect()
    }

    fn record_field(record: &Value, seg: &str) -> Result<Value, SprigError> {
        match record {
            Value::Record(r) => {
                let rec = r.read().expect("record lock");
                let sym_key = Key::Symbol(symbols::intern(seg));
                let str_key = Key::Str(seg.to_string());
                rec.get(&sym_key)
                    .or_else(|| rec.get(&str_key))
                    .cloned()
                    .ok_or_else(|| SprigError::Lookup(format!("record field `{}`", seg)))
            }
            other => Err(SprigError::Type(format!(
                "cannot read field `{}` of {}",
                seg,
                other.type_name()
            ))),
        }
    }

    fn load_dot_path(&self, sym: &Symbol) -> Result<Value, SprigError> {
        let segs = Self::dot_segments(sym);
        let root = symbols::intern(&segs[0]);
        let mut value = self.load_symbol(&root)?;
        for seg in &segs[1..] {
            value = Self::record_field(&value, seg)?;
        }
        Ok(value)
    }

    fn store_dot_path(&mut self, sym: &Symbol, new_value: Value) -> Result<(), SprigError> {
        let segs = Self::dot_segments(sym);
        let root = symbols::intern(&segs[0]);
        let mut value = self.load_symbol(&root)?;
        for seg in &segs[1..segs.len() - 1] {
            value = Self::record_field(&value, seg)?;
        }
        let last = &segs[segs.len() - 1];
        match value {
            Value::Record(r) => {
                let mut rec = r.write().expect("record lock");
                let sym_key = Key::Symbol(symbols::intern(last));
                let key = if rec.contains(&Key::Str(last.to_string())) {
                    Key::Str(last.to_string())
                } else {
                    sym_key
                };
                rec.insert(key, new_value);
                Ok(())
            }
            other => Err(SprigError::Type(format!(
                "cannot set field `{}` of {}",
                last,
                other.type_name()
            ))),
        }
    }

    fn call_symbol(&mut self, sym: &Symbol, nargs: usize) -> Result<(), SprigError> {
        match self.load_symbol(sym) {
            Ok(Value::Function(f)) => self.call_function(f, nargs),
            Ok(other) => Err(SprigError::Type(format!(
                "`{}` is not callable (it is a {})",
                sym,
                other.type_name()
            ))),
            Err(lookup_err) => {
                let ty = self
                    .types
                    .read()
                    .expect("type table lock")
                    .get(&sym.id)
                    .cloned();
                match ty {
                    Some(t) => self.construct_record(&t, nargs),
                    None => Err(lookup_err),
                }
            }
        }
    }

    pub(crate) fn call_function(
        &mut self,
        func: Arc<Function>,
        nargs: usize,
    ) -> Result<(), SprigError> {
        match &func.kind {
            FunctionKind::Native(native) => {
                let mut args = Vec::with_capacity(nargs);
                for _ in 0..nargs {
                    args.push(self.data.pop()?);
                }
                args.reverse();
                let result = self.call_native(*native, args)?;
                self.data.push(result);
                self.ip += 1;
                Ok(())
            }
            FunctionKind::Compiled {
                nargs: declared,
                varargs,
                ..
            } => {
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(SprigError::Fault(format!(
                        "call depth exceeded {}",
                        MAX_CALL_DEPTH
                    )));
                }
                self.collect_args(nargs, *declared, *varargs)?;
                let caller = self
                    .cur
                    .clone()
                    .ok_or_else(|| SprigError::Fault("call with no caller".into()))?;
                self.frames.push(Frame {
                    function: caller,
                    pos: self.ip + 1,
                    loop_depth: self.loops.len(),
                });
                self.cur = Some(func);
                self.ip = 0;
                Ok(())
            }
        }
    }

    /// Invoke a native procedure, converting a panic inside the host code
    /// into an ordinary error value.
    fn call_native(
        &mut self,
        native: crate::values::NativeFn,
        args: Vec<Value>,
    ) -> Result<Value, SprigError> {
        match catch_unwind(AssertUnwindSafe(|| native(self, args))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in native call".to_string());
                Err(SprigError::Host(msg))
            }
        }
    }

    /// Arity check; variadic callees collect excess arguments into a list
    /// bound to the trailing parameter.
    fn collect_args(
        &mut self,
        provided: usize,
        declared: usize,
        varargs: bool,
    ) -> Result<(), SprigError> {
        if varargs {
            let required = declared.saturating_sub(1);
            if provided < required {
                return Err(SprigError::Arity(format!(
                    "expected at least {}, got {}",
                    required, provided
                )));
            }
            let mut rest = Vec::with_capacity(provided - required);
            for _ in 0..provided - required {
                rest.push(self.data.pop()?);
            }
            rest.reverse();
            self.data.push(Value::list(rest));
        } else if provided != declared {
            return Err(SprigError::Arity(format!(
                "expected {}, got {}",
                declared, provided
            )));
        }
        Ok(())
    }

    fn construct_record(
        &mut self,
        ty: &crate::interp::RecordType,
        nargs: usize,
    ) -> Result<(), SprigError> {
        if nargs != ty.fields.len() {
            return Err(SprigError::Arity(format!(
                "constructor {} expects {} fields, got {}",
                ty.name,
                ty.fields.len(),
                nargs
            )));
        }
        let mut args = Vec::with_capacity(nargs);
        for _ in 0..nargs {
            args.push(self.data.pop()?);
        }
        args.reverse();
        let mut rec = Record::with_type(ty.name.name.to_string());
        for (field, value) in ty.fields.iter().zip(args) {
            rec.insert(Key::Symbol(field.clone()), value);
        }
        self.data.push(Value::record(rec));
        self.ip += 1;
        Ok(())
    }

    fn pop_to_mark(&mut self, sym: &Symbol) -> Result<(), SprigError> {
        loop {
            match self.data.pop()? {
                Value::Stackmark(s) if s == *sym => return Ok(()),
                _ => {}
            }
        }
    }

    fn exec_loop_exit(
        &mut self,
        body: &[Instruction],
        target: Arc<Loop>,
        scopes: usize,
        cache: CachedTarget,
        kind: LoopExit,
    ) -> Result<(), SprigError> {
        self.pop_to_mark(&target.label)?;
        for _ in 0..scopes {
            self.pop_scope()?;
        }
        // Abandon loops nested inside the target.
        while let Some(top) = self.loops.peek() {
            if Arc::ptr_eq(top, &target) {
                break;
            }
            self.loops.pop()?;
        }
        if self.loops.is_empty() {
            return Err(SprigError::Fault("break outside of a running loop".into()));
        }
        let dest = match cache.get() {
            Some(d) => d,
            None => {
                let start = body
                    .iter()
                    .position(|i| matches!(i, Instruction::LoopStart(l) if Arc::ptr_eq(l, &target)))
                    .ok_or_else(|| SprigError::Fault("loop start not found".into()))?;
                let offset = match kind {
                    LoopExit::Break => target.break_offset(),
                    LoopExit::Continue => target.continue_offset(),
                }
                .ok_or_else(|| SprigError::Fault("loop offsets unset".into()))?;
                let d = start + offset;
                cache.set(d);
                d
            }
        };
        if dest >= body.len() {
            return Err(SprigError::Fault(format!(
                "loop jump target {} out of range",
                dest
            )));
        }
        self.ip = dest;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;

    fn run_body(body: Vec<Instruction>) -> Result<Value, SprigError> {
        let mut interp = Interp::new();
        let func = Arc::new(Function {
            name: symbols::intern("__test"),
            kind: FunctionKind::Compiled {
                body: Arc::new(body),
                nargs: 0,
                varargs: false,
                source: Value::Null,
            },
            closure: None,
            is_builder: false,
        });
        interp.cur = Some(func);
        interp.ip = 0;
        interp.exec_loop(0)?;
        interp.data.pop()
    }

    #[test]
    fn test_push_dup_pop() {
        let v = run_body(vec![
            Instruction::Push(Value::Int(5)),
            Instruction::Dup,
            Instruction::Pop,
            Instruction::Return(None),
        ])
        .unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn test_branch_taken_and_not() {
        let v = run_body(vec![
            Instruction::Push(Value::Bool(false)),
            Instruction::Branch {
                when: false,
                offset: 3,
            },
            Instruction::Push(Value::Int(1)),
            Instruction::Jump { offset: 2 },
            Instruction::Push(Value::Int(2)),
            Instruction::Return(None),
        ])
        .unwrap();
        assert_eq!(v, Value::Int(2));
    }

    #[test]
    fn test_out_of_range_jump_is_fault() {
        let err = run_body(vec![
            Instruction::Jump { offset: 99 },
            Instruction::Return(None),
        ])
        .unwrap_err();
        assert!(err.is_fault());
    }

    #[test]
    fn test_goto_out_of_range_is_fault() {
        let err = run_body(vec![Instruction::Goto(7), Instruction::Return(None)]).unwrap_err();
        assert!(err.is_fault());
    }

    #[test]
    fn test_squash_list_rebuild() {
        let v = run_body(vec![
            Instruction::PushMarker,
            Instruction::Push(Value::Int(1)),
            Instruction::Push(Value::Int(2)),
            Instruction::Push(Value::Int(3)),
            Instruction::Squash(SquashKind::List),
            Instruction::Return(None),
        ])
        .unwrap();
        assert_eq!(v.display_pretty(), "(1 2 3)");
    }

    #[test]
    fn test_explode_splices_elements() {
        let v = run_body(vec![
            Instruction::PushMarker,
            Instruction::Push(Value::Int(0)),
            Instruction::Push(Value::list([Value::Int(1), Value::Int(2)])),
            Instruction::Explode,
            Instruction::Squash(SquashKind::Array),
            Instruction::Return(None),
        ])
        .unwrap();
        assert_eq!(v.display_pretty(), "[0 1 2]");
    }

    #[test]
    fn test_clear_stackmark_keeps_values_above() {
        let mark = symbols::intern("vm-test-mark");
        let v = run_body(vec![
            Instruction::PushStackmark(mark.clone()),
            Instruction::Push(Value::Int(9)),
            Instruction::ClearStackmark(mark),
            Instruction::Return(None),
        ])
        .unwrap();
        assert_eq!(v, Value::Int(9));
    }

    #[test]
    fn test_assert_return_propagates_error() {
        let err = run_body(vec![Instruction::Return(Some("boom".into()))]).unwrap_err();
        assert!(matches!(err, SprigError::Assert(m) if m == "boom"));
    }

    #[test]
    fn test_stack_underflow_is_fault() {
        let err = run_body(vec![Instruction::Pop, Instruction::Return(None)]).unwrap_err();
        assert!(err.is_fault());
    }
}
