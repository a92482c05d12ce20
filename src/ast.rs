//! Abstract syntax tree for nash source.
//!
//! Nodes print back to re-parseable source through `Display`; parsing a
//! printed tree yields the same tree again.

mod types;

pub use types::*;
