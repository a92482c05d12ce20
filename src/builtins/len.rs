//! len — element count of a list, or character count of a string.

use crate::interpreter::{EvalError, Obj, Shell};

use super::Builtin;

pub struct Len;

impl Builtin for Len {
    fn name(&self) -> &'static str {
        "len"
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["list"]
    }

    fn run(&self, mut args: Vec<Obj>, _shell: &Shell) -> Result<Option<Obj>, EvalError> {
        match args.remove(0) {
            Obj::List(items) => Ok(Some(Obj::Str(items.len().to_string()))),
            Obj::Str(s) => Ok(Some(Obj::Str(s.chars().count().to_string()))),
            other => Err(EvalError::TypeMismatch {
                expected: "list",
                got: other.kind(),
            }),
        }
    }
}
