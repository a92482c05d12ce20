//! Expression evaluation.
//!
//! Reduces AST expressions to runtime values against a scope. Expression
//! evaluation never runs commands, so it is synchronous; capturing command
//! output is the statement-level exec-assign's job.

use crate::ast::{ConcatExpr, Expr, IndexExpr, ListExpr};

use super::object::Obj;
use super::result::{EvalError, EvalResult};
use super::scope::Shell;

impl Shell {
    /// Evaluate any argument expression.
    pub fn eval_expr(&self, expr: &Expr) -> EvalResult<Obj> {
        match expr {
            Expr::Str(s) => Ok(Obj::Str(s.value.clone())),
            Expr::Concat(c) => Ok(Obj::Str(self.eval_concat(c)?)),
            Expr::Var(_) | Expr::Index(_) => self.eval_variable(expr),
            Expr::List(l) => self.eval_list(l),
            Expr::Int(_) => Err(EvalError::Runtime(format!(
                "Invalid argument type: {}",
                expr
            ))),
        }
    }

    /// Evaluate a variable or indexed variable reference.
    pub(crate) fn eval_variable(&self, expr: &Expr) -> EvalResult<Obj> {
        match expr {
            Expr::Index(indexed) => self.eval_indexed_var(indexed),
            Expr::Var(var) => match self.get_var(&var.name[1..]) {
                Some(value) => Ok(value),
                None => Err(EvalError::VarNotSet {
                    name: var.name.clone(),
                    shell: self.name().to_string(),
                }),
            },
            _ => Err(EvalError::Runtime(format!(
                "Invalid eval of non variable argument: {}",
                expr
            ))),
        }
    }

    fn eval_indexed_var(&self, indexed: &IndexExpr) -> EvalResult<Obj> {
        let value = self.eval_variable(&Expr::Var(indexed.var.clone()))?;
        let values = match value {
            Obj::List(values) => values,
            other => {
                return Err(EvalError::Runtime(format!(
                    "Invalid indexing of non-list variable: {}",
                    other.kind()
                )))
            }
        };

        let index: i64 = match &*indexed.index {
            Expr::Int(i) => i.value,
            Expr::Var(_) => match self.eval_variable(&indexed.index)? {
                Obj::Str(s) => s.parse().map_err(|_| {
                    EvalError::Runtime(format!("Invalid index value: {}", s))
                })?,
                other => {
                    return Err(EvalError::Runtime(format!(
                        "Invalid object type on index value: {}",
                        other.kind()
                    )))
                }
            },
            other => {
                return Err(EvalError::Runtime(format!("Invalid index: {}", other)))
            }
        };

        if index < 0 || index as usize >= values.len() {
            return Err(EvalError::IndexOutOfBounds {
                name: indexed.var.name.clone(),
                len: values.len(),
                index,
            });
        }

        Ok(values[index as usize].clone())
    }

    /// Concatenation joins string parts only; lists and nested concats
    /// are rejected.
    fn eval_concat(&self, concat: &ConcatExpr) -> EvalResult<String> {
        let mut out = String::new();
        for part in &concat.parts {
            match part {
                Expr::Concat(_) => {
                    return Err(EvalError::Runtime("Nested concat is not allowed".into()))
                }
                Expr::List(_) => {
                    return Err(EvalError::Runtime(format!(
                        "Concat of lists is not allowed: {}",
                        part
                    )))
                }
                Expr::Var(_) | Expr::Index(_) => {
                    let value = self.eval_variable(part)?;
                    match value {
                        Obj::Str(s) => out.push_str(&s),
                        Obj::List(_) => {
                            return Err(EvalError::Runtime(format!(
                                "Concat of list variables is not allowed: {} = {}",
                                part, value
                            )))
                        }
                        other => {
                            return Err(EvalError::Runtime(format!(
                                "Invalid concat element: {}",
                                other
                            )))
                        }
                    }
                }
                Expr::Str(s) => out.push_str(&s.value),
                Expr::Int(_) => {
                    return Err(EvalError::Runtime(format!(
                        "Invalid concat element: {}",
                        part
                    )))
                }
            }
        }
        Ok(out)
    }

    fn eval_list(&self, list: &ListExpr) -> EvalResult<Obj> {
        let mut values = Vec::with_capacity(list.items.len());
        for item in &list.items {
            values.push(self.eval_expr(item)?);
        }
        Ok(Obj::List(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IntExpr, StringExpr, VarExpr};
    use crate::lexer::Pos;

    fn pos() -> Pos {
        Pos { line: 1, column: 1 }
    }

    fn var(name: &str) -> Expr {
        Expr::Var(VarExpr {
            pos: pos(),
            name: name.into(),
        })
    }

    fn quoted(value: &str) -> Expr {
        Expr::Str(StringExpr {
            pos: pos(),
            value: value.into(),
            quoted: true,
        })
    }

    #[test]
    fn string_literal_evaluates_to_itself() {
        let shell = Shell::new_bare_root();
        assert_eq!(
            shell.eval_expr(&quoted("hi")).unwrap(),
            Obj::Str("hi".into())
        );
    }

    #[test]
    fn unset_variable_names_shell_in_error() {
        let shell = Shell::new_bare_root();
        let err = shell.eval_expr(&var("$missing")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Variable $missing not set on shell root"
        );
    }

    #[test]
    fn index_into_list() {
        let shell = Shell::new_bare_root();
        shell.set_var(
            "l",
            Obj::List(vec![
                Obj::Str("a".into()),
                Obj::Str("b".into()),
                Obj::Str("c".into()),
            ]),
        );

        let idx = Expr::Index(crate::ast::IndexExpr {
            pos: pos(),
            var: VarExpr {
                pos: pos(),
                name: "$l".into(),
            },
            index: Box::new(Expr::Int(IntExpr { pos: pos(), value: 1 })),
        });
        assert_eq!(shell.eval_expr(&idx).unwrap(), Obj::Str("b".into()));
    }

    #[test]
    fn index_via_variable() {
        let shell = Shell::new_bare_root();
        shell.set_var(
            "l",
            Obj::List(vec![Obj::Str("x".into()), Obj::Str("y".into())]),
        );
        shell.set_var("i", Obj::Str("1".into()));

        let idx = Expr::Index(crate::ast::IndexExpr {
            pos: pos(),
            var: VarExpr {
                pos: pos(),
                name: "$l".into(),
            },
            index: Box::new(var("$i")),
        });
        assert_eq!(shell.eval_expr(&idx).unwrap(), Obj::Str("y".into()));
    }

    #[test]
    fn index_out_of_bounds() {
        let shell = Shell::new_bare_root();
        shell.set_var("l", Obj::List(vec![Obj::Str("a".into())]));

        let idx = Expr::Index(crate::ast::IndexExpr {
            pos: pos(),
            var: VarExpr {
                pos: pos(),
                name: "$l".into(),
            },
            index: Box::new(Expr::Int(IntExpr { pos: pos(), value: 3 })),
        });
        let err = shell.eval_expr(&idx).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn index_of_non_list_fails() {
        let shell = Shell::new_bare_root();
        shell.set_var("s", Obj::Str("nope".into()));

        let idx = Expr::Index(crate::ast::IndexExpr {
            pos: pos(),
            var: VarExpr {
                pos: pos(),
                name: "$s".into(),
            },
            index: Box::new(Expr::Int(IntExpr { pos: pos(), value: 0 })),
        });
        let err = shell.eval_expr(&idx).unwrap_err();
        assert!(err.to_string().contains("non-list"));
    }

    #[test]
    fn concat_joins_strings_and_vars() {
        let shell = Shell::new_bare_root();
        shell.set_var("dir", Obj::Str("/tmp".into()));

        let concat = Expr::Concat(ConcatExpr {
            pos: pos(),
            parts: vec![var("$dir"), quoted("/file")],
        });
        assert_eq!(
            shell.eval_expr(&concat).unwrap(),
            Obj::Str("/tmp/file".into())
        );
    }

    #[test]
    fn concat_of_list_variable_fails() {
        let shell = Shell::new_bare_root();
        shell.set_var("l", Obj::List(vec![Obj::Str("a".into())]));

        let concat = Expr::Concat(ConcatExpr {
            pos: pos(),
            parts: vec![var("$l"), quoted("x")],
        });
        let err = shell.eval_expr(&concat).unwrap_err();
        assert!(err.to_string().contains("list variables is not allowed"));
    }

    #[test]
    fn list_evaluates_each_item() {
        let shell = Shell::new_bare_root();
        shell.set_var("b", Obj::Str("B".into()));

        let list = Expr::List(ListExpr {
            pos: pos(),
            items: vec![quoted("a"), var("$b")],
        });
        assert_eq!(
            shell.eval_expr(&list).unwrap(),
            Obj::List(vec![Obj::Str("a".into()), Obj::Str("B".into())])
        );
    }
}
