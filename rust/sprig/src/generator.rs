//! The compiler: a one-pass recursive tree-walk from value trees to
//! bytecode.
//!
//! Each special form lowers to a fixed instruction pattern. Generation
//! threads an immutable [`GenContext`] through every recursive call, so
//! nested sub-generation (cond arms, loop bodies, function literals) is
//! reentrant. Executing a generated sequence leaves exactly one net value
//! on the data stack; statement forms normalize to pushing `()`.

use std::sync::Arc;

use crate::bytecode::{CachedTarget, Instruction, Loop, SquashKind};
use crate::closure::Closure;
use crate::error::SprigError;
use crate::interp::Interp;
use crate::symbols::{self, Symbol};
use crate::values::{Function, FunctionKind, Value};

/// Compile-time state threaded through recursive generation.
#[derive(Clone)]
pub struct GenContext {
    fn_name: Option<Symbol>,
    fn_nargs: usize,
    fn_varargs: bool,
    tail: bool,
    /// Scopes opened since function entry, the function scope included.
    scope_depth: usize,
    loops: Vec<LoopCtx>,
}

#[derive(Clone)]
struct LoopCtx {
    user_label: Option<Symbol>,
    record: Arc<Loop>,
    /// Scope depth just inside the loop's own scope.
    depth: usize,
}

impl GenContext {
    pub fn top_level() -> Self {
        GenContext {
            fn_name: None,
            fn_nargs: 0,
            fn_varargs: false,
            tail: false,
            scope_depth: 0,
            loops: Vec::new(),
        }
    }

    fn non_tail(&self) -> Self {
        GenContext {
            tail: false,
            ..self.clone()
        }
    }

    fn deeper(&self) -> Self {
        GenContext {
            scope_depth: self.scope_depth + 1,
            ..self.clone()
        }
    }
}

pub struct Generator<'env> {
    env: &'env mut Interp,
}

impl<'env> Generator<'env> {
    pub fn new(env: &'env mut Interp) -> Self {
        Generator { env }
    }

    pub fn generate(
        &mut self,
        expr: &Value,
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        match expr {
            Value::Symbol(s) if s.is_sigil => Ok(vec![Instruction::Push(expr.clone())]),
            Value::Symbol(s) => Ok(vec![Instruction::LoadSym(s.clone())]),
            Value::Pair(_) => self.gen_form(expr, ctx),
            Value::Array(a) => {
                // array literals rebuild on every evaluation
                let items = a.read().expect("array lock").clone();
                let mut code = vec![Instruction::PushMarker];
                for item in &items {
                    code.extend(self.generate(item, &ctx.non_tail())?);
                }
                code.push(Instruction::Squash(SquashKind::Array));
                Ok(code)
            }
            other => Ok(vec![Instruction::Push(other.clone())]),
        }
    }

    /// Sequence forms, keeping only the last value. The final form
    /// inherits the caller's tail position.
    fn gen_body(
        &mut self,
        forms: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        if forms.is_empty() {
            return Ok(vec![Instruction::Push(Value::Null)]);
        }
        let mut code = Vec::new();
        for (i, form) in forms.iter().enumerate() {
            if i + 1 == forms.len() {
                code.extend(self.generate(form, ctx)?);
            } else {
                code.extend(self.generate(form, &ctx.non_tail())?);
                code.push(Instruction::Pop);
            }
        }
        Ok(code)
    }

    fn gen_form(
        &mut self,
        expr: &Value,
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        let items = expr
            .list_items()
            .ok_or_else(|| SprigError::Compile("cannot compile a dotted pair".into()))?;
        let (head, args) = items
            .split_first()
            .ok_or_else(|| SprigError::Compile("cannot compile an empty form".into()))?;

        let head_sym = match head {
            Value::Symbol(s) => s.clone(),
            // computed callee: arguments first, then the callee, then dispatch
            _ => {
                let mut code = Vec::new();
                for arg in args {
                    code.extend(self.generate(arg, &ctx.non_tail())?);
                }
                code.extend(self.generate(head, &ctx.non_tail())?);
                code.push(Instruction::Dispatch { nargs: args.len() });
                return Ok(code);
            }
        };

        match &*head_sym.name {
            "quote" => {
                self.expect_arity("quote", args, 1)?;
                Ok(vec![Instruction::Push(args[0].clone())])
            }
            "begin" | "do" => self.gen_body(args, ctx),
            "if" => self.gen_if(args, ctx),
            "cond" => self.gen_cond(args, ctx),
            "and" => self.gen_logic(args, ctx, false),
            "or" => self.gen_logic(args, ctx, true),
            "let" => self.gen_let(args, ctx, false),
            "let*" => self.gen_let(args, ctx, true),
            "def" => self.gen_def(args, ctx, false),
            "set" => self.gen_def(args, ctx, true),
            "mdef" => self.gen_mdef(args, ctx),
            "fn" => self.gen_fn(None, args, ctx),
            "defn" => self.gen_defn(args, ctx),
            "defmac" => self.gen_defmac(args),
            "syntax-quote" => {
                self.expect_arity("syntax-quote", args, 1)?;
                self.gen_quasi(&args[0], ctx)
            }
            "unquote" | "unquote-splicing" => Err(SprigError::Compile(format!(
                "`{}` outside of a syntax-quote",
                head_sym
            ))),
            "for" => self.gen_for(args, ctx),
            "break" => self.gen_loop_exit(args, ctx, true),
            "continue" => self.gen_loop_exit(args, ctx, false),
            "assert" => self.gen_assert(args, ctx),
            _ => self.gen_call(&head_sym, args, ctx),
        }
    }

    fn expect_arity(
        &self,
        form: &str,
        args: &[Value],
        want: usize,
    ) -> Result<(), SprigError> {
        if args.len() != want {
            return Err(SprigError::Compile(format!(
                "`{}` takes {} argument{}, got {}",
                form,
                want,
                if want == 1 { "" } else { "s" },
                args.len()
            )));
        }
        Ok(())
    }

    fn gen_if(&mut self, args: &[Value], ctx: &GenContext) -> Result<Vec<Instruction>, SprigError> {
        if args.len() < 2 || args.len() > 3 {
            return Err(SprigError::Compile(format!(
                "`if` takes 2 or 3 arguments, got {}",
                args.len()
            )));
        }
        let mut code = self.generate(&args[0], &ctx.non_tail())?;
        let then_code = self.generate(&args[1], ctx)?;
        let else_code = match args.get(2) {
            Some(e) => self.generate(e, ctx)?,
            None => vec![Instruction::Push(Value::Null)],
        };
        code.push(Instruction::Branch {
            when: false,
            offset: (then_code.len() + 2) as isize,
        });
        code.extend(then_code);
        code.push(Instruction::Jump {
            offset: (else_code.len() + 1) as isize,
        });
        code.extend(else_code);
        Ok(code)
    }

    /// `(cond p1 e1 … pn en default)` — predicate/branch/jump cascade.
    /// The rightmost clause is the unconditional default and is required.
    fn gen_cond(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        let Some((default, clauses)) = args.split_last() else {
            return Err(SprigError::Compile(
                "`cond` requires predicate/expression pairs and a trailing default".into(),
            ));
        };
        if clauses.len() % 2 != 0 {
            return Err(SprigError::Compile(
                "`cond` requires predicate/expression pairs and a trailing default".into(),
            ));
        }
        let mut acc = self.generate(default, ctx)?;
        for pair in clauses.chunks(2).rev() {
            let mut block = self.generate(&pair[0], &ctx.non_tail())?;
            let clause = self.generate(&pair[1], ctx)?;
            block.push(Instruction::Branch {
                when: false,
                offset: (clause.len() + 2) as isize,
            });
            block.extend(clause);
            block.push(Instruction::Jump {
                offset: (acc.len() + 1) as isize,
            });
            block.extend(acc);
            acc = block;
        }
        Ok(acc)
    }

    /// `and`/`or`: duplicate + branch + pop chains, assembled right to
    /// left so each operand short-circuits over everything after it.
    fn gen_logic(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
        when: bool,
    ) -> Result<Vec<Instruction>, SprigError> {
        let Some((last, init)) = args.split_last() else {
            return Ok(vec![Instruction::Push(Value::Bool(!when))]);
        };
        let mut acc = self.generate(last, &ctx.non_tail())?;
        for op in init.iter().rev() {
            let mut block = self.generate(op, &ctx.non_tail())?;
            block.push(Instruction::Dup);
            block.push(Instruction::Branch {
                when,
                offset: (acc.len() + 2) as isize,
            });
            block.push(Instruction::Pop);
            block.extend(acc);
            acc = block;
        }
        Ok(acc)
    }

    fn binding_pairs(&self, form: &str, v: &Value) -> Result<Vec<(Symbol, Value)>, SprigError> {
        let items = match v {
            Value::Array(a) => a.read().expect("array lock").clone(),
            _ => {
                return Err(SprigError::Compile(format!(
                    "`{}` bindings must be an array",
                    form
                )))
            }
        };
        if items.len() % 2 != 0 {
            return Err(SprigError::Compile(format!(
                "`{}` bindings must pair names with values",
                form
            )));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks(2) {
            let name = self.binding_name(form, &pair[0])?;
            pairs.push((name, pair[1].clone()));
        }
        Ok(pairs)
    }

    fn binding_name(&self, form: &str, v: &Value) -> Result<Symbol, SprigError> {
        match v {
            Value::Symbol(s) if !s.is_dot && !s.is_sigil => Ok(s.clone()),
            other => Err(SprigError::Compile(format!(
                "`{}` cannot bind {}",
                form,
                other.display_pretty()
            ))),
        }
    }

    fn gen_let(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
        sequential: bool,
    ) -> Result<Vec<Instruction>, SprigError> {
        let form = if sequential { "let*" } else { "let" };
        let Some((bindings, body)) = args.split_first() else {
            return Err(SprigError::Compile(format!("`{}` needs a binding array", form)));
        };
        let pairs = self.binding_pairs(form, bindings)?;
        let inner = ctx.deeper();
        let mut code = Vec::new();
        if sequential {
            code.push(Instruction::AddScope);
            for (name, rhs) in &pairs {
                code.extend(self.generate(rhs, &inner.non_tail())?);
                code.push(Instruction::StoreSym(name.clone()));
            }
        } else {
            // parallel: every right-hand side sees the outer scope
            for (_, rhs) in &pairs {
                code.extend(self.generate(rhs, &ctx.non_tail())?);
            }
            code.push(Instruction::AddScope);
            for (name, _) in pairs.iter().rev() {
                code.push(Instruction::StoreSym(name.clone()));
            }
        }
        code.extend(self.gen_body(body, &inner)?);
        code.push(Instruction::RemoveScope);
        Ok(code)
    }

    fn check_rebind(&self, name: &Symbol) -> Result<(), SprigError> {
        if self.env.is_builtin(name.id) {
            return Err(SprigError::Compile(format!(
                "cannot rebind builtin `{}`",
                name
            )));
        }
        if self.env.is_macro(name.id) {
            return Err(SprigError::Compile(format!(
                "cannot rebind macro `{}`",
                name
            )));
        }
        Ok(())
    }

    /// `def` binds in the current scope; `set` rebinds the nearest
    /// existing binding (defining when unbound). Both yield their value.
    fn gen_def(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
        update: bool,
    ) -> Result<Vec<Instruction>, SprigError> {
        let form = if update { "set" } else { "def" };
        self.expect_arity(form, args, 2)?;
        let name = match &args[0] {
            Value::Symbol(s) if update && s.is_dot => s.clone(),
            other => self.binding_name(form, other)?,
        };
        self.check_rebind(&name)?;
        let rhs = &args[1];
        let mut code = if !update && is_fn_form(rhs) {
            let fn_items = rhs.list_items().expect("fn form is a list");
            self.gen_fn(Some(name.clone()), &fn_items[1..], ctx)?
        } else {
            self.generate(rhs, &ctx.non_tail())?
        };
        code.push(Instruction::Dup);
        code.push(if update {
            Instruction::UpdateSym(name)
        } else {
            Instruction::StoreSym(name)
        });
        Ok(code)
    }

    /// `(mdef a b c rhs)` destructures a list across several names.
    fn gen_mdef(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        if args.len() < 2 {
            return Err(SprigError::Compile(
                "`mdef` needs at least one name and a value".into(),
            ));
        }
        let (rhs, names) = args.split_last().expect("mdef args checked");
        let mut syms = Vec::with_capacity(names.len());
        for name in names {
            let sym = self.binding_name("mdef", name)?;
            self.check_rebind(&sym)?;
            syms.push(sym);
        }
        let mut code = self.generate(rhs, &ctx.non_tail())?;
        code.push(Instruction::Dup);
        code.push(Instruction::StoreList(syms));
        Ok(code)
    }

    fn gen_defn(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        if args.len() < 2 {
            return Err(SprigError::Compile(
                "`defn` needs a name and a parameter array".into(),
            ));
        }
        let name = self.binding_name("defn", &args[0])?;
        self.check_rebind(&name)?;
        let mut code = self.gen_fn(Some(name.clone()), &args[1..], ctx)?;
        code.push(Instruction::Dup);
        code.push(Instruction::StoreSym(name));
        Ok(code)
    }

    /// Synthesize a function body: a call-frame boundary, parameter
    /// stores in reverse order, the compiled body, and a return. Emits a
    /// closure-creation instruction for the assembled function.
    fn gen_fn(
        &mut self,
        name: Option<Symbol>,
        parts: &[Value],
        _ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        let Some((params, body_forms)) = parts.split_first() else {
            return Err(SprigError::Compile("`fn` needs a parameter array".into()));
        };
        let (params, varargs) = self.parse_params(params)?;
        let fn_sym = name
            .clone()
            .unwrap_or_else(|| symbols::gensym("fn"));
        let body_ctx = GenContext {
            fn_name: name,
            fn_nargs: params.len(),
            fn_varargs: varargs,
            tail: true,
            scope_depth: 1,
            loops: Vec::new(),
        };
        let mut body = vec![Instruction::AddFuncScope {
            name: fn_sym.name.clone(),
        }];
        for param in params.iter().rev() {
            body.push(Instruction::StoreSym(param.clone()));
        }
        body.extend(self.gen_body(body_forms, &body_ctx)?);
        body.push(Instruction::Return(None));
        let mut source = vec![Value::sym("fn")];
        source.extend(parts.iter().cloned());
        let func = Function {
            name: fn_sym,
            kind: FunctionKind::Compiled {
                body: Arc::new(body),
                nargs: params.len(),
                varargs,
                source: Value::list(source),
            },
            closure: None,
            is_builder: false,
        };
        Ok(vec![Instruction::CreateClosure(Arc::new(func))])
    }

    fn parse_params(&self, v: &Value) -> Result<(Vec<Symbol>, bool), SprigError> {
        let items = match v {
            Value::Array(a) => a.read().expect("array lock").clone(),
            _ => {
                return Err(SprigError::Compile(
                    "function parameters must be an array".into(),
                ))
            }
        };
        let mut params = Vec::new();
        let mut varargs = false;
        let mut iter = items.iter().peekable();
        while let Some(item) = iter.next() {
            let sym = self.binding_name("fn", item)?;
            if &*sym.name == "&" {
                let rest = iter.next().ok_or_else(|| {
                    SprigError::Compile("`&` must be followed by a rest parameter".into())
                })?;
                if iter.peek().is_some() {
                    return Err(SprigError::Compile(
                        "the rest parameter must be last".into(),
                    ));
                }
                params.push(self.binding_name("fn", rest)?);
                varargs = true;
                break;
            }
            params.push(sym);
        }
        Ok((params, varargs))
    }

    /// `defmac` compiles its body like `fn` and registers the result in
    /// the macro table immediately; the VM never sees the macro.
    fn gen_defmac(&mut self, args: &[Value]) -> Result<Vec<Instruction>, SprigError> {
        if args.len() < 2 {
            return Err(SprigError::Compile(
                "`defmac` needs a name and a parameter array".into(),
            ));
        }
        let name = self.binding_name("defmac", &args[0])?;
        if self.env.is_builtin(name.id) {
            return Err(SprigError::Compile(format!(
                "cannot rebind builtin `{}` as a macro",
                name
            )));
        }
        let Some((params, body_forms)) = args[1..].split_first() else {
            return Err(SprigError::Compile("`defmac` needs a parameter array".into()));
        };
        let (params, varargs) = self.parse_params(params)?;
        let body_ctx = GenContext {
            fn_name: None,
            fn_nargs: params.len(),
            fn_varargs: varargs,
            tail: true,
            scope_depth: 1,
            loops: Vec::new(),
        };
        let mut body = vec![Instruction::AddFuncScope {
            name: name.name.clone(),
        }];
        for param in params.iter().rev() {
            body.push(Instruction::StoreSym(param.clone()));
        }
        body.extend(self.gen_body(body_forms, &body_ctx)?);
        body.push(Instruction::Return(None));
        let mut source = vec![Value::sym("defmac"), Value::Symbol(name.clone())];
        source.extend(args[1..].iter().cloned());
        let func = Function {
            name: name.clone(),
            kind: FunctionKind::Compiled {
                body: Arc::new(body),
                nargs: params.len(),
                varargs,
                source: Value::list(source),
            },
            closure: Some(Closure::capture(self.env.scopes.live())),
            is_builder: false,
        };
        self.env
            .macros
            .write()
            .expect("macro table lock")
            .insert(name.id, Arc::new(func));
        Ok(vec![Instruction::Push(Value::Symbol(name))])
    }

    /// Quasiquotation: marker-bracketed push/explode/squash sequences
    /// rebuild the quoted structure with unquoted holes substituted.
    fn gen_quasi(
        &mut self,
        expr: &Value,
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        match expr {
            Value::Pair(_) => {
                let Some(items) = expr.list_items() else {
                    return Ok(vec![Instruction::Push(expr.clone())]);
                };
                if let Some(inner) = match_head(&items, "unquote") {
                    return self.generate(inner, &ctx.non_tail());
                }
                if match_head(&items, "unquote-splicing").is_some() {
                    return Err(SprigError::Compile(
                        "`unquote-splicing` is only valid inside a quoted sequence".into(),
                    ));
                }
                let mut code = vec![Instruction::PushMarker];
                for item in &items {
                    self.gen_quasi_element(item, ctx, &mut code)?;
                }
                code.push(Instruction::Squash(SquashKind::List));
                Ok(code)
            }
            Value::Array(a) => {
                let items = a.read().expect("array lock").clone();
                let mut code = vec![Instruction::PushMarker];
                for item in &items {
                    self.gen_quasi_element(item, ctx, &mut code)?;
                }
                code.push(Instruction::Squash(SquashKind::Array));
                Ok(code)
            }
            other => Ok(vec![Instruction::Push(other.clone())]),
        }
    }

    fn gen_quasi_element(
        &mut self,
        item: &Value,
        ctx: &GenContext,
        code: &mut Vec<Instruction>,
    ) -> Result<(), SprigError> {
        if let Some(items) = item.list_items() {
            if let Some(inner) = match_head(&items, "unquote-splicing") {
                code.extend(self.generate(inner, &ctx.non_tail())?);
                code.push(Instruction::Explode);
                return Ok(());
            }
        }
        code.extend(self.gen_quasi(item, ctx)?);
        Ok(())
    }

    /// `(for [init test incr] body…)`, optionally labeled. Lowers to a
    /// jump-linked loop with a registered loop record; each iteration is
    /// bracketed by a stackmark so the data stack stays clean no matter
    /// what the body pushed.
    fn gen_for(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        let (user_label, rest) = match args.first() {
            Some(Value::Symbol(s)) if !s.is_dot && !s.is_sigil => {
                (Some(s.clone()), &args[1..])
            }
            _ => (None, args),
        };
        let Some((header, body_forms)) = rest.split_first() else {
            return Err(SprigError::Compile(
                "`for` needs an [init test incr] header".into(),
            ));
        };
        let header = match header {
            Value::Array(a) => a.read().expect("array lock").clone(),
            _ => {
                return Err(SprigError::Compile(
                    "`for` header must be an array of three forms".into(),
                ))
            }
        };
        if header.len() != 3 {
            return Err(SprigError::Compile(format!(
                "`for` header must hold exactly init, test, and increment, got {}",
                header.len()
            )));
        }
        let record = Arc::new(Loop::new(symbols::gensym("loop")));
        let mut inner = ctx.non_tail().deeper();
        inner.loops.push(LoopCtx {
            user_label,
            record: record.clone(),
            depth: inner.scope_depth,
        });

        let init = self.generate(&header[0], &inner)?;
        let test = self.generate(&header[1], &inner)?;
        let incr = self.generate(&header[2], &inner)?;

        let mut code = vec![Instruction::AddScope];
        let loop_pos = code.len();
        code.push(Instruction::LoopStart(record.clone()));
        code.extend(init);
        code.push(Instruction::Pop);
        let test_pos = code.len();
        code.extend(test);
        let branch_pos = code.len();
        code.push(Instruction::Branch {
            when: false,
            offset: 0, // patched below
        });
        code.push(Instruction::PushStackmark(record.label.clone()));
        for form in body_forms {
            code.extend(self.generate(form, &inner)?);
            code.push(Instruction::Pop);
        }
        code.push(Instruction::PopUntilStackmark(record.label.clone()));
        let incr_pos = code.len();
        code.extend(incr);
        code.push(Instruction::Pop);
        let jump_pos = code.len();
        code.push(Instruction::Jump {
            offset: test_pos as isize - jump_pos as isize,
        });
        let end_pos = code.len();
        code.push(Instruction::LoopEnd);
        code.push(Instruction::Push(Value::Null));
        code.push(Instruction::RemoveScope);
        code[branch_pos] = Instruction::Branch {
            when: false,
            offset: (end_pos - branch_pos) as isize,
        };
        record.set_offsets(end_pos - loop_pos, incr_pos - loop_pos);
        Ok(code)
    }

    fn gen_loop_exit(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
        is_break: bool,
    ) -> Result<Vec<Instruction>, SprigError> {
        let form = if is_break { "break" } else { "continue" };
        let label = match args {
            [] => None,
            [Value::Symbol(s)] => Some(s.clone()),
            _ => {
                return Err(SprigError::Compile(format!(
                    "`{}` takes at most a loop label",
                    form
                )))
            }
        };
        let target = match &label {
            None => ctx.loops.last(),
            Some(l) => ctx
                .loops
                .iter()
                .rev()
                .find(|lc| lc.user_label.as_ref() == Some(l)),
        };
        let Some(target) = target else {
            return Err(match label {
                None => SprigError::Compile(format!("`{}` outside of a loop", form)),
                Some(l) => SprigError::Compile(format!("no enclosing loop labeled `{}`", l)),
            });
        };
        let scopes = ctx.scope_depth - target.depth;
        let instr = if is_break {
            Instruction::Break {
                target: target.record.clone(),
                scopes,
                cache: CachedTarget::new(),
            }
        } else {
            Instruction::Continue {
                target: target.record.clone(),
                scopes,
                cache: CachedTarget::new(),
            }
        };
        Ok(vec![instr])
    }

    /// `(assert expr)` — a failed assertion propagates through a return
    /// instruction carrying the error.
    fn gen_assert(
        &mut self,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        self.expect_arity("assert", args, 1)?;
        let mut code = self.generate(&args[0], &ctx.non_tail())?;
        code.push(Instruction::Branch {
            when: true,
            offset: 2,
        });
        code.push(Instruction::Return(Some(args[0].display_pretty())));
        code.push(Instruction::Push(Value::Bool(true)));
        Ok(code)
    }

    fn gen_call(
        &mut self,
        head: &Symbol,
        args: &[Value],
        ctx: &GenContext,
    ) -> Result<Vec<Instruction>, SprigError> {
        // macros rewrite the expression at compile time, in an isolated
        // duplicate of the compiling environment
        let mac = self
            .env
            .macros
            .read()
            .expect("macro table lock")
            .get(&head.id)
            .cloned();
        if let Some(mac) = mac {
            let mut iso = self.env.duplicate();
            let expanded = iso.apply(&mac, args.to_vec())?;
            return self.generate(&expanded, ctx);
        }

        // builders receive their argument forms unevaluated
        let bound = self
            .env
            .global
            .read()
            .expect("global scope lock")
            .get(head.id);
        if let Some(Value::Function(f)) = &bound {
            if f.is_builder {
                let mut code: Vec<Instruction> =
                    args.iter().map(|a| Instruction::Push(a.clone())).collect();
                code.push(Instruction::Call {
                    sym: head.clone(),
                    nargs: args.len(),
                });
                return Ok(code);
            }
        }

        let mut code = Vec::new();
        for arg in args {
            code.extend(self.generate(arg, &ctx.non_tail())?);
        }

        // self-tail-call: pop the scopes opened since function entry and
        // re-enter at instruction 0 instead of growing the return stack
        if ctx.tail
            && ctx.fn_name.as_ref() == Some(head)
            && !ctx.fn_varargs
            && args.len() == ctx.fn_nargs
        {
            code.push(Instruction::RemoveScopes(ctx.scope_depth));
            code.push(Instruction::Goto(0));
            return Ok(code);
        }

        code.push(Instruction::Call {
            sym: head.clone(),
            nargs: args.len(),
        });
        Ok(code)
    }
}

fn is_fn_form(v: &Value) -> bool {
    v.list_items()
        .and_then(|items| items.first().cloned())
        .and_then(|head| head.as_symbol().map(|s| &*s.name == "fn"))
        .unwrap_or(false)
}

fn match_head<'a>(items: &'a [Value], name: &str) -> Option<&'a Value> {
    match items {
        [Value::Symbol(s), arg] if &*s.name == name => Some(arg),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_source;

    fn gen_one(src: &str) -> Result<Vec<Instruction>, SprigError> {
        let mut interp = Interp::new();
        let forms = parse_source(src).unwrap();
        let mut gen = Generator::new(&mut interp);
        gen.generate(&forms[0], &GenContext::top_level())
    }

    #[test]
    fn test_literal_is_single_push() {
        let code = gen_one("42").unwrap();
        assert_eq!(code.len(), 1);
        assert!(matches!(code[0], Instruction::Push(Value::Int(42))));
    }

    #[test]
    fn test_symbol_loads_at_runtime() {
        let code = gen_one("forward-ref").unwrap();
        assert!(matches!(code[0], Instruction::LoadSym(_)));
    }

    #[test]
    fn test_call_compiles_args_left_to_right() {
        let code = gen_one("(+ 1 2)").unwrap();
        assert!(matches!(code[0], Instruction::Push(Value::Int(1))));
        assert!(matches!(code[1], Instruction::Push(Value::Int(2))));
        assert!(matches!(code[2], Instruction::Call { nargs: 2, .. }));
    }

    #[test]
    fn test_cond_without_default_is_compile_error() {
        let err = gen_one("(cond (< 1 2) 3)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_odd_let_bindings_are_compile_error() {
        let err = gen_one("(let [x] x)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_let_binding_must_be_symbol() {
        let err = gen_one("(let [1 2] 3)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_break_outside_loop_is_compile_error() {
        let err = gen_one("(break)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_unknown_break_label_is_compile_error() {
        let err = gen_one("(for [(def i 0) (< i 3) (def i (+ i 1))] (break missing))").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_rebind_builtin_is_compile_error() {
        let err = gen_one("(def car 1)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_self_tail_call_uses_goto() {
        let code = gen_one("(defn count-down [n] (if (== n 0) 0 (count-down (- n 1))))").unwrap();
        let Instruction::CreateClosure(func) = &code[0] else {
            panic!("expected closure creation");
        };
        let FunctionKind::Compiled { body, .. } = &func.kind else {
            panic!("expected compiled function");
        };
        assert!(body.iter().any(|i| matches!(i, Instruction::Goto(0))));
        assert!(body
            .iter()
            .any(|i| matches!(i, Instruction::RemoveScopes(1))));
    }

    #[test]
    fn test_unquote_outside_syntax_quote_is_compile_error() {
        let err = gen_one("(unquote x)").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_for_registers_offsets() {
        let code = gen_one("(for [(def i 0) (< i 3) (def i (+ i 1))] i)").unwrap();
        let record = code
            .iter()
            .find_map(|i| match i {
                Instruction::LoopStart(l) => Some(l.clone()),
                _ => None,
            })
            .expect("loop record");
        assert!(record.break_offset().is_some());
        assert!(record.continue_offset().is_some());
        assert!(record.break_offset() > record.continue_offset());
    }
}
