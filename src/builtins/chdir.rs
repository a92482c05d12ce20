//! chdir — change the working directory and update `PWD`.

use crate::interpreter::{EvalError, Obj, Shell};

use super::Builtin;

pub struct Chdir;

impl Builtin for Chdir {
    fn name(&self) -> &'static str {
        "chdir"
    }

    fn arg_names(&self) -> &'static [&'static str] {
        &["dir"]
    }

    fn run(&self, mut args: Vec<Obj>, shell: &Shell) -> Result<Option<Obj>, EvalError> {
        let path = match args.remove(0) {
            Obj::Str(path) => path,
            other => {
                return Err(EvalError::TypeMismatch {
                    expected: "string",
                    got: other.kind(),
                })
            }
        };
        std::env::set_current_dir(&path)?;
        shell.setenv("PWD", Obj::Str(path));
        Ok(None)
    }
}
