//! Sprig
//!
//! An embeddable Lisp: source text is read into S-expression values,
//! compiled in one linear pass to bytecode, and executed on a stack
//! machine with lexical scoping, closures, compile-time macros, and
//! self-tail-call elimination.
//!
//! ```
//! use sprig::Interp;
//!
//! let mut interp = Interp::new();
//! let v = interp.eval("(defn twice [x] (* 2 x)) (twice 21)").unwrap();
//! assert_eq!(v, sprig::Value::Int(42));
//! ```
//!
//! Two behaviors worth knowing when embedding:
//!
//! - `set` on a name that is bound nowhere defines it in the current
//!   scope instead of raising; programs rely on this.
//! - [`Interp::duplicate`] shares the *same* global scope with its
//!   parent. Individual accesses are lock-guarded, but concurrent
//!   read-modify-write of one global from two running instances is a
//!   race the embedder must synchronize.

pub mod builtins;
pub mod bytecode;
pub mod channel;
pub mod closure;
pub mod error;
pub mod generator;
pub mod interop;
pub mod interp;
pub mod reader;
pub mod record;
pub mod scope;
pub mod stack;
pub mod symbols;
pub mod values;
pub mod vm;

pub use error::SprigError;
pub use interp::Interp;
pub use values::{Function, Value};
