//! Sprig CLI library: the interactive REPL.

pub mod repl;
