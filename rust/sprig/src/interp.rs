//! The embedding façade: one interpreter instance.
//!
//! An `Interp` owns the four stacks and the loaded program. Duplicated
//! instances share the symbol table (process-wide), the builtin, macro,
//! and record-type tables, and — deliberately — the same global scope
//! reference as their parent: a top-level `def` in one instance is
//! visible to all of them. Each scope access is lock-guarded, but
//! concurrent read-modify-write of the same global from two running
//! instances is a race the embedder must synchronize.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::builtins;
use crate::bytecode::{disassemble, Instruction, Loop};
use crate::error::{SprigError, TraceFrame};
use crate::generator::{GenContext, Generator};
use crate::interop::StructRegistry;
use crate::reader::parse_source;
use crate::scope::{Scope, ScopeRef};
use crate::stack::Stack;
use crate::symbols::{self, Symbol};
use crate::values::{Function, FunctionKind, Value};

/// A record type registered by `defrecord`; its name is callable as a
/// constructor.
#[derive(Debug)]
pub struct RecordType {
    pub name: Symbol,
    pub fields: Vec<Symbol>,
}

/// A return address: the caller and the position to resume at.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub function: Arc<Function>,
    pub pos: usize,
    pub loop_depth: usize,
}

pub struct Interp {
    pub(crate) data: Stack<Value>,
    pub(crate) frames: Stack<Frame>,
    pub(crate) scopes: Stack<ScopeRef>,
    pub(crate) loops: Stack<Arc<Loop>>,
    pub(crate) global: ScopeRef,
    pub(crate) builtins: Arc<RwLock<HashMap<u32, Arc<Function>>>>,
    pub(crate) macros: Arc<RwLock<HashMap<u32, Arc<Function>>>>,
    pub(crate) types: Arc<RwLock<HashMap<u32, Arc<RecordType>>>>,
    pub(crate) registry: Arc<RwLock<StructRegistry>>,
    pub(crate) cur: Option<Arc<Function>>,
    pub(crate) ip: usize,
    pub(crate) main: Option<Arc<Function>>,
    /// Captured print output (for testing and tracing).
    pub output: Vec<String>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    pub fn new() -> Self {
        let global = Scope::new("global");
        let mut scopes = Stack::new();
        scopes.push(global.clone());
        let mut interp = Interp {
            data: Stack::new(),
            frames: Stack::new(),
            scopes,
            loops: Stack::new(),
            global,
            builtins: Arc::new(RwLock::new(HashMap::new())),
            macros: Arc::new(RwLock::new(HashMap::new())),
            types: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(RwLock::new(StructRegistry::new())),
            cur: None,
            ip: 0,
            main: None,
            output: Vec::new(),
        };
        builtins::install(&mut interp);
        interp
    }

    /// A new instance with fresh stacks that shares this one's global
    /// scope and builtin/macro/type tables.
    pub fn duplicate(&self) -> Interp {
        let mut scopes = Stack::new();
        scopes.push(self.global.clone());
        Interp {
            data: Stack::new(),
            frames: Stack::new(),
            scopes,
            loops: Stack::new(),
            global: self.global.clone(),
            builtins: self.builtins.clone(),
            macros: self.macros.clone(),
            types: self.types.clone(),
            registry: self.registry.clone(),
            cur: None,
            ip: 0,
            main: None,
            output: Vec::new(),
        }
    }

    /// Parse and compile `text` into the pending program. Any reader or
    /// compile error aborts the whole load; nothing is linked.
    pub fn load(&mut self, text: &str) -> Result<(), SprigError> {
        let forms = parse_source(text)?;
        let mut body: Vec<Instruction> = Vec::new();
        {
            let mut gen = Generator::new(self);
            for (i, form) in forms.iter().enumerate() {
                if i > 0 {
                    body.push(Instruction::Pop);
                }
                body.extend(gen.generate(form, &GenContext::top_level())?);
            }
        }
        if body.is_empty() {
            body.push(Instruction::Push(Value::Null));
        }
        body.push(Instruction::Return(None));
        self.main = Some(Arc::new(Function {
            name: symbols::intern("__main"),
            kind: FunctionKind::Compiled {
                body: Arc::new(body),
                nargs: 0,
                varargs: false,
                source: Value::Null,
            },
            closure: None,
            is_builder: false,
        }));
        Ok(())
    }

    /// Execute the loaded program, returning its final value.
    pub fn run(&mut self) -> Result<Value, SprigError> {
        let main = self
            .main
            .clone()
            .ok_or_else(|| SprigError::Fault("no program loaded".into()))?;
        self.cur = Some(main);
        self.ip = 0;
        match self.exec_loop(0) {
            Ok(()) => self.data.pop(),
            Err(e) => Err(e.with_stack_trace(self.trace_frames())),
        }
    }

    /// Load + run in one step (the REPL path).
    pub fn eval(&mut self, text: &str) -> Result<Value, SprigError> {
        self.load(text)?;
        self.run()
    }

    /// Discard all volatile state after an error: data, return, and loop
    /// stacks are cleared and the scope stack is cut back to the global.
    pub fn reset(&mut self) {
        self.data.clear();
        self.frames.clear();
        self.loops.clear();
        self.scopes.clear();
        self.scopes.push(self.global.clone());
        self.cur = None;
        self.ip = 0;
    }

    /// Render a function's bytecode for diagnostics, with its source form
    /// as a header when one was recorded.
    pub fn dump_instructions(&self, func: &Function) -> String {
        match &func.kind {
            FunctionKind::Native(_) => format!("{}: <native>\n", func.name),
            FunctionKind::Compiled { body, source, .. } => {
                let mut out = format!("{}:\n", func.name);
                if !matches!(source, Value::Null) {
                    out.push_str(&format!("; {}\n", source.display_pretty()));
                }
                out.push_str(&disassemble(body));
                out
            }
        }
    }

    /// Render the loaded program's bytecode, if any.
    pub fn dump_program(&self) -> Option<String> {
        self.main.as_ref().map(|f| self.dump_instructions(f))
    }

    /// Register a host type factory for record binding.
    pub fn register_struct(&mut self, name: &str, factory: crate::interop::Factory) {
        self.registry
            .write()
            .expect("registry lock")
            .register(name, factory);
    }

    pub(crate) fn is_builtin(&self, id: u32) -> bool {
        self.builtins
            .read()
            .expect("builtin table lock")
            .contains_key(&id)
    }

    pub(crate) fn is_macro(&self, id: u32) -> bool {
        self.macros
            .read()
            .expect("macro table lock")
            .contains_key(&id)
    }

    /// Bind a value in the global scope (embedding hook; also used to
    /// install builtins).
    pub fn bind_global(&mut self, name: &str, value: Value) {
        let sym = symbols::intern(name);
        self.global
            .write()
            .expect("global scope lock")
            .bind(sym.id, value);
    }

    /// Unwind the return-address stack into printable trace frames, the
    /// innermost call last.
    pub(crate) fn trace_frames(&self) -> Vec<TraceFrame> {
        let mut frames: Vec<TraceFrame> = self
            .frames
            .iter()
            .map(|f| TraceFrame {
                function: f.function.name.to_string(),
                pos: f.pos,
            })
            .collect();
        if let Some(cur) = &self.cur {
            frames.push(TraceFrame {
                function: cur.name.to_string(),
                pos: self.ip,
            });
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_simple_expression() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval("(+ 1 2)").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_empty_program_yields_null() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval("").unwrap(), Value::Null);
    }

    #[test]
    fn test_last_form_wins() {
        let mut interp = Interp::new();
        assert_eq!(interp.eval("1 2 3").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_duplicate_shares_global_scope() {
        let mut parent = Interp::new();
        parent.eval("(def shared-g 41)").unwrap();
        let mut child = parent.duplicate();
        assert_eq!(child.eval("(+ shared-g 1)").unwrap(), Value::Int(42));
        child.eval("(def shared-g 10)").unwrap();
        assert_eq!(parent.eval("shared-g").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_reset_after_error() {
        let mut interp = Interp::new();
        assert!(interp.eval("(car 1)").is_err());
        interp.reset();
        assert_eq!(interp.eval("7").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_error_carries_stack_trace() {
        let mut interp = Interp::new();
        let err = interp
            .eval("(defn boom [] no-such-symbol) (boom)")
            .unwrap_err();
        assert!(err.is_lookup());
        assert!(!err.stack_frames().is_empty());
    }
}
