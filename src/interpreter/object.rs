//! Runtime values.
//!
//! An [`Obj`] is either a string, a list of values, or a function value.
//! Values are copied on assignment at the language surface; internally
//! lists clone and function values are reference counted.

use std::fmt;
use std::sync::Arc;

use crate::ast::escape_string;
use crate::builtins::{Builtin, BuiltinRunner};
use crate::runner::{FnRunner, Runner, UserFn};

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Obj {
    Str(String),
    List(Vec<Obj>),
    Fn(FnValue),
}

impl Obj {
    /// Kind name used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Obj::Str(_) => "string",
            Obj::List(_) => "list",
            Obj::Fn(_) => "function",
        }
    }

    /// Quoted, re-parseable form used by `dump`.
    pub fn repr(&self) -> String {
        match self {
            Obj::Str(s) => format!("\"{}\"", escape_string(s)),
            Obj::List(items) => {
                let inner: Vec<String> = items.iter().map(Obj::repr).collect();
                format!("({})", inner.join(" "))
            }
            Obj::Fn(f) => f.repr(),
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => f.write_str(s),
            Obj::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Obj::Fn(value) => f.write_str(&value.repr()),
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Obj::Str(a), Obj::Str(b)) => a == b,
            (Obj::List(a), Obj::List(b)) => a == b,
            (Obj::Fn(a), Obj::Fn(b)) => a == b,
            _ => false,
        }
    }
}

/// A callable value: a user-defined function or a registered builtin.
#[derive(Clone)]
pub enum FnValue {
    User(Arc<UserFn>),
    Builtin(Arc<dyn Builtin>),
}

impl FnValue {
    pub fn name(&self) -> &str {
        match self {
            FnValue::User(f) => f.name(),
            FnValue::Builtin(b) => b.name(),
        }
    }

    /// Source-level representation. User functions reproduce their
    /// declaration; builtins print a stub.
    pub fn repr(&self) -> String {
        match self {
            FnValue::User(f) => f.repr().to_string(),
            FnValue::Builtin(b) => format!("builtin {}", b.name()),
        }
    }

    /// Instantiate a runner for one invocation.
    pub fn runner(&self) -> Box<dyn Runner> {
        match self {
            FnValue::User(f) => Box::new(FnRunner::new(f.clone())),
            FnValue::Builtin(b) => Box::new(BuiltinRunner::new(b.clone())),
        }
    }
}

impl fmt::Debug for FnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnValue::User(func) => write!(f, "Fn({})", func.name()),
            FnValue::Builtin(b) => write!(f, "Builtin({})", b.name()),
        }
    }
}

impl PartialEq for FnValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FnValue::User(a), FnValue::User(b)) => Arc::ptr_eq(a, b),
            (FnValue::Builtin(a), FnValue::Builtin(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_displays_as_itself() {
        assert_eq!(Obj::Str("hi".into()).to_string(), "hi");
    }

    #[test]
    fn list_displays_elements_joined() {
        let list = Obj::List(vec![
            Obj::Str("a".into()),
            Obj::Str("b".into()),
            Obj::List(vec![Obj::Str("c".into())]),
        ]);
        assert_eq!(list.to_string(), "a b c");
    }

    #[test]
    fn repr_is_quoted() {
        assert_eq!(Obj::Str("a\"b".into()).repr(), "\"a\\\"b\"");
        let list = Obj::List(vec![Obj::Str("a".into()), Obj::Str("b".into())]);
        assert_eq!(list.repr(), "(\"a\" \"b\")");
    }

    #[test]
    fn kind_names() {
        assert_eq!(Obj::Str(String::new()).kind(), "string");
        assert_eq!(Obj::List(Vec::new()).kind(), "list");
    }
}
