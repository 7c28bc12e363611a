//! The bytecode instruction set and loop metadata.
//!
//! Instructions are generated in one linear pass and executed by the
//! fetch-execute loop in `vm.rs`. Branch targets inside a form are
//! relative; `Goto` is absolute within the current function body.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::symbols::Symbol;
use crate::values::{Function, Value};

/// Loop metadata registered by the generator. Offsets are relative to the
/// `LoopStart` instruction and are filled in once the loop's blocks have
/// been assembled.
#[derive(Debug)]
pub struct Loop {
    pub label: Symbol,
    break_offset: OnceLock<usize>,
    continue_offset: OnceLock<usize>,
}

impl Loop {
    pub fn new(label: Symbol) -> Self {
        Loop {
            label,
            break_offset: OnceLock::new(),
            continue_offset: OnceLock::new(),
        }
    }

    pub fn set_offsets(&self, break_offset: usize, continue_offset: usize) {
        self.break_offset
            .set(break_offset)
            .expect("loop offsets set twice");
        self.continue_offset
            .set(continue_offset)
            .expect("loop offsets set twice");
    }

    pub fn break_offset(&self) -> Option<usize> {
        self.break_offset.get().copied()
    }

    pub fn continue_offset(&self) -> Option<usize> {
        self.continue_offset.get().copied()
    }
}

/// Absolute jump target resolved and cached on first execution of a
/// break/continue site.
#[derive(Debug, Clone, Default)]
pub struct CachedTarget(Arc<OnceLock<usize>>);

impl CachedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<usize> {
        self.0.get().copied()
    }

    pub fn set(&self, target: usize) {
        // A second set with the same value is a no-op; targets never change
        // for a given site.
        let _ = self.0.set(target);
    }
}

/// Container kind rebuilt by `Squash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquashKind {
    List,
    Array,
    Hash,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// Push a literal value.
    Push(Value),
    Pop,
    Dup,
    /// Lexical lookup; push the bound value.
    LoadSym(Symbol),
    /// Pop; bind in the current (innermost) scope.
    StoreSym(Symbol),
    /// Pop; rebind the nearest existing binding, or define when unbound.
    UpdateSym(Symbol),
    /// Pop a list; destructure positionally into the given names.
    StoreList(Vec<Symbol>),
    /// Call through a bound symbol with `nargs` stacked arguments.
    Call { sym: Symbol, nargs: usize },
    /// Like `Call`, but the callee is popped from the data stack.
    Dispatch { nargs: usize },
    /// Pop a condition; jump by `offset` when its truthiness equals `when`.
    Branch { when: bool, offset: isize },
    Jump { offset: isize },
    /// Absolute jump within the current body (tail-call re-entry).
    Goto(usize),
    AddScope,
    /// Push a scope marked as a call-frame boundary.
    AddFuncScope { name: Arc<str> },
    RemoveScope,
    RemoveScopes(usize),
    /// Pop the return frame. `Some(msg)` propagates an assertion failure
    /// instead of resuming the caller.
    Return(Option<String>),
    /// Snapshot the live scope stack and push the closed-over function.
    CreateClosure(Arc<Function>),
    LoopStart(Arc<Loop>),
    LoopEnd,
    Break {
        target: Arc<Loop>,
        scopes: usize,
        cache: CachedTarget,
    },
    Continue {
        target: Arc<Loop>,
        scopes: usize,
        cache: CachedTarget,
    },
    PushStackmark(Symbol),
    /// Pop values until the named mark has been popped.
    PopUntilStackmark(Symbol),
    /// Remove the nearest matching mark, keeping values above it.
    ClearStackmark(Symbol),
    /// Open a quasiquote rebuild.
    PushMarker,
    /// Pop a list or array; push its elements in order.
    Explode,
    /// Pop down to the marker and rebuild a container from the elements.
    Squash(SquashKind),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Push(v) => write!(f, "push {}", v.display_quoted()),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::LoadSym(s) => write!(f, "load {}", s),
            Instruction::StoreSym(s) => write!(f, "store {}", s),
            Instruction::UpdateSym(s) => write!(f, "update {}", s),
            Instruction::StoreList(syms) => {
                let names: Vec<String> = syms.iter().map(|s| s.to_string()).collect();
                write!(f, "store-list [{}]", names.join(" "))
            }
            Instruction::Call { sym, nargs } => write!(f, "call {}/{}", sym, nargs),
            Instruction::Dispatch { nargs } => write!(f, "dispatch /{}", nargs),
            Instruction::Branch { when, offset } => {
                write!(f, "branch {} {:+}", if *when { "t" } else { "f" }, offset)
            }
            Instruction::Jump { offset } => write!(f, "jump {:+}", offset),
            Instruction::Goto(target) => write!(f, "goto {}", target),
            Instruction::AddScope => write!(f, "add-scope"),
            Instruction::AddFuncScope { name } => write!(f, "add-fn-scope {}", name),
            Instruction::RemoveScope => write!(f, "remove-scope"),
            Instruction::RemoveScopes(n) => write!(f, "remove-scopes {}", n),
            Instruction::Return(None) => write!(f, "return"),
            Instruction::Return(Some(msg)) => write!(f, "return-fail {:?}", msg),
            Instruction::CreateClosure(func) => write!(f, "closure {}", func.name),
            Instruction::LoopStart(l) => write!(f, "loop-start {}", l.label),
            Instruction::LoopEnd => write!(f, "loop-end"),
            Instruction::Break { target, scopes, .. } => {
                write!(f, "break {} scopes={}", target.label, scopes)
            }
            Instruction::Continue { target, scopes, .. } => {
                write!(f, "continue {} scopes={}", target.label, scopes)
            }
            Instruction::PushStackmark(s) => write!(f, "push-mark {}", s),
            Instruction::PopUntilStackmark(s) => write!(f, "pop-to-mark {}", s),
            Instruction::ClearStackmark(s) => write!(f, "clear-mark {}", s),
            Instruction::PushMarker => write!(f, "marker"),
            Instruction::Explode => write!(f, "explode"),
            Instruction::Squash(SquashKind::List) => write!(f, "squash-list"),
            Instruction::Squash(SquashKind::Array) => write!(f, "squash-array"),
            Instruction::Squash(SquashKind::Hash) => write!(f, "squash-hash"),
        }
    }
}

/// Render a body as numbered instructions, one per line.
pub fn disassemble(body: &[Instruction]) -> String {
    let mut out = String::new();
    for (i, instr) in body.iter().enumerate() {
        out.push_str(&format!("{:4}: {}\n", i, instr));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::intern;

    #[test]
    fn test_loop_offsets_set_once() {
        let l = Loop::new(intern("bc-test-loop"));
        assert_eq!(l.break_offset(), None);
        l.set_offsets(10, 7);
        assert_eq!(l.break_offset(), Some(10));
        assert_eq!(l.continue_offset(), Some(7));
    }

    #[test]
    fn test_cached_target() {
        let c = CachedTarget::new();
        assert_eq!(c.get(), None);
        c.set(12);
        assert_eq!(c.get(), Some(12));
        let shared = c.clone();
        assert_eq!(shared.get(), Some(12));
    }

    #[test]
    fn test_disassembly_format() {
        let body = vec![
            Instruction::Push(Value::Int(1)),
            Instruction::LoadSym(intern("x")),
            Instruction::Call {
                sym: intern("+"),
                nargs: 2,
            },
            Instruction::Return(None),
        ];
        let text = disassemble(&body);
        assert!(text.contains("0: push 1"));
        assert!(text.contains("2: call +/2"));
        assert!(text.contains("3: return"));
    }
}
