//! nash: an interpreter for a small shell-style scripting language.
//!
//! Source text flows through a hand-written streaming [`lexer`], a
//! recursive-descent [`parser`] with one token of lookahead, and a
//! tree-walking evaluator with lexically nested scopes, first-class
//! function values, external-process pipelines with redirections, and
//! signal-driven interruption.
//!
//! This crate provides:
//!
//! - **Lexer**: context-sensitive tokenizer for shell-style source
//! - **Parser**: builds the AST; errors carry `file:line:column`
//! - **AST**: typed statement and expression nodes that print back to
//!   re-parseable source
//! - **Interpreter**: the [`Shell`] scope chain and the tree walker
//! - **Runners**: one execution contract over external commands, user
//!   functions and builtins
//! - **Scheduler**: pipeline wiring and redirection to files and sockets
//! - **Builtins**: `len`, `append`, `chdir`, plus the bootstrap `cd`
//!   binding
//!
//! The interactive front end lives elsewhere; embedding starts at
//! [`Shell::new_root`] and [`Shell::exec`].

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runner;
pub mod scheduler;
mod signals;
pub mod streams;

pub use interpreter::{Control, EvalError, FnValue, Obj, Shell};
pub use parser::{parse, ParseError, Parser};
