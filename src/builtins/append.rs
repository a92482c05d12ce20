//! append — new list with an element appended.

use crate::interpreter::{EvalError, Obj, Shell};

use super::Builtin;

pub struct Append;

impl Builtin for Append {
    fn name(&self) -> &'static str {
        "append"
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["list", "value"]
    }

    fn run(&self, args: Vec<Obj>, _shell: &Shell) -> Result<Option<Obj>, EvalError> {
        let mut iter = args.into_iter();
        let (Some(list), Some(value)) = (iter.next(), iter.next()) else {
            return Err(EvalError::Runtime("append expects 2 arguments".into()));
        };
        match list {
            Obj::List(mut items) => {
                items.push(value);
                Ok(Some(Obj::List(items)))
            }
            other => Err(EvalError::TypeMismatch {
                expected: "list",
                got: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_list() {
        let shell = Shell::new_bare_root();
        let list = Obj::List(vec![Obj::Str("a".into())]);
        let result = Append
            .run(vec![list, Obj::Str("b".into())], &shell)
            .unwrap();
        assert_eq!(
            result,
            Some(Obj::List(vec![Obj::Str("a".into()), Obj::Str("b".into())]))
        );
    }

    #[test]
    fn rejects_non_list() {
        let shell = Shell::new_bare_root();
        let err = Append
            .run(vec![Obj::Str("a".into()), Obj::Str("b".into())], &shell)
            .unwrap_err();
        assert!(err.to_string().contains("expected list"));
    }
}
