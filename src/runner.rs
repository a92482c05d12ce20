//! The uniform execution contract.
//!
//! A [`Runner`] runs one invocation of something command-shaped: an
//! external process, a user-defined function, or a builtin (through an
//! adapter). The evaluator and the pipeline builder drive every variant
//! identically: configure environment, arguments and streams, then
//! `start` and `wait`.

use async_trait::async_trait;

use crate::ast::Expr;
use crate::interpreter::{Control, EvalError, Obj, Shell};
use crate::streams::{Input, Output};

pub mod command;
pub mod userfn;

pub use command::CmdRunner;
pub use userfn::{FnRunner, UserFn};

#[async_trait]
pub trait Runner: Send {
    /// Pre-evaluate argument expressions in the caller scope. User
    /// functions also validate arity here.
    fn set_args(&mut self, args: &[Expr], scope: &Shell) -> Result<(), EvalError>;

    /// Replace the environment. Must be called before `set_args` for
    /// commands, so argument-derived values are not shadowed.
    fn set_environ(&mut self, environ: Vec<String>);

    fn set_stdin(&mut self, stdin: Input);
    fn set_stdout(&mut self, stdout: Output);
    fn set_stderr(&mut self, stderr: Output);

    fn stdin(&self) -> Input;
    fn stdout(&self) -> Output;
    fn stderr(&self) -> Output;

    /// Pipe reader connected to this runner's stdout. Must be called
    /// before `start`; the runner drops its write end once started.
    fn stdout_pipe(&mut self) -> Result<Input, EvalError>;

    /// Begin execution. `start` without a prior `set_args` is a zero-arg
    /// invocation.
    async fn start(&mut self) -> Result<(), Control>;

    /// Join execution. After a failed `start` this reports the start
    /// error.
    async fn wait(&mut self) -> Result<(), Control>;

    /// Final value, for function runners.
    fn results(&mut self) -> Option<Obj>;
}
