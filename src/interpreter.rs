//! The tree-walking interpreter.
//!
//! Built in layers:
//!
//! - **object**: runtime values — strings, lists, function values
//! - **scope**: the [`Shell`], a lexical frame chain holding vars, fns,
//!   binds, env and stream handles
//! - **eval**: expression evaluation (synchronous)
//! - **exec**: statement evaluation and the tree walker (async — it runs
//!   commands)
//! - **result**: error kinds, control-flow carriers and exit codes

mod eval;
mod exec;
pub mod object;
pub mod result;
pub mod scope;

pub use object::{FnValue, Obj};
pub use result::{Control, EvalError, EvalResult, ENOTFOUND, ENOTSTARTED, ESUCCESS};
pub use scope::Shell;
