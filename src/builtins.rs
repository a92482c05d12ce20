//! Builtins registered on the root scope at startup.
//!
//! One file per builtin. Each is also bound as a function variable of the
//! same name, so builtins are first-class values (`x = $len`).

mod append;
mod chdir;
mod len;

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::Expr;
use crate::interpreter::{Control, EvalError, Obj, Shell};
use crate::runner::Runner;
use crate::streams::{Input, Output};

pub use append::Append;
pub use chdir::Chdir;
pub use len::Len;

/// A builtin function: named, fixed arity, runs synchronously against the
/// caller's scope chain.
pub trait Builtin: Send + Sync {
    fn name(&self) -> &'static str;
    fn arg_names(&self) -> &'static [&'static str];
    fn run(&self, args: Vec<Obj>, shell: &Shell) -> Result<Option<Obj>, EvalError>;
}

/// Register every builtin on the root scope.
pub fn register_builtins(shell: &Arc<Shell>) {
    let builtins: [Arc<dyn Builtin>; 3] = [Arc::new(Len), Arc::new(Append), Arc::new(Chdir)];
    for builtin in builtins {
        shell.add_builtin(builtin);
    }
}

/// Adapter running a builtin under the [`Runner`] contract, so function
/// invocation has a single execution path.
pub(crate) struct BuiltinRunner {
    builtin: Arc<dyn Builtin>,
    shell: Option<Arc<Shell>>,
    args: Vec<Obj>,
    result: Option<Obj>,
}

impl BuiltinRunner {
    pub(crate) fn new(builtin: Arc<dyn Builtin>) -> Self {
        Self {
            builtin,
            shell: None,
            args: Vec::new(),
            result: None,
        }
    }
}

#[async_trait]
impl Runner for BuiltinRunner {
    fn set_args(&mut self, args: &[Expr], scope: &Shell) -> Result<(), EvalError> {
        let expected = self.builtin.arg_names().len();
        if args.len() != expected {
            return Err(EvalError::Runtime(format!(
                "{} expects {} arguments, but given {}",
                self.builtin.name(),
                expected,
                args.len()
            )));
        }
        self.args = args
            .iter()
            .map(|arg| scope.eval_expr(arg))
            .collect::<Result<_, _>>()?;
        self.shell = Some(scope.strong());
        Ok(())
    }

    fn set_environ(&mut self, _environ: Vec<String>) {}
    fn set_stdin(&mut self, _stdin: Input) {}
    fn set_stdout(&mut self, _stdout: Output) {}
    fn set_stderr(&mut self, _stderr: Output) {}

    fn stdin(&self) -> Input {
        Input::Stdin
    }

    fn stdout(&self) -> Output {
        Output::Stdout
    }

    fn stderr(&self) -> Output {
        Output::Stderr
    }

    fn stdout_pipe(&mut self) -> Result<Input, EvalError> {
        Err(EvalError::Runtime(format!(
            "builtin {} cannot be part of a pipeline",
            self.builtin.name()
        )))
    }

    async fn start(&mut self) -> Result<(), Control> {
        let Some(shell) = self.shell.take() else {
            return Err(EvalError::Runtime(format!(
                "builtin {}: no caller scope",
                self.builtin.name()
            ))
            .into());
        };
        let args = std::mem::take(&mut self.args);
        self.result = self.builtin.run(args, &shell)?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), Control> {
        Ok(())
    }

    fn results(&mut self) -> Option<Obj> {
        self.result.take()
    }
}
