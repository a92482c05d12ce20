//! User-defined function values and their runner.
//!
//! A [`UserFn`] is the immutable function value created by a `fn`
//! declaration: name, parameter names, body tree and the lexical parent
//! scope captured at declaration time. Each invocation builds a fresh
//! [`FnRunner`], which instantiates a subshell for the body and runs it
//! as its own task, so a function can sit in a pipeline like any
//! command.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ast::{Expr, Tree};
use crate::interpreter::{Control, EvalError, Obj, Shell};
use crate::streams::{Input, Output, Sink};

use super::Runner;

/// A declared function: the value stored in scopes and bound as a
/// variable.
pub struct UserFn {
    name: String,
    arg_names: Vec<String>,
    tree: Arc<Tree>,
    parent: Arc<Shell>,
    repr: String,
}

impl UserFn {
    pub fn new(
        name: &str,
        arg_names: Vec<String>,
        tree: Tree,
        parent: Arc<Shell>,
        repr: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            arg_names,
            tree: Arc::new(tree),
            parent,
            repr,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    /// Source-level representation (the declaration text).
    pub fn repr(&self) -> &str {
        &self.repr
    }
}

impl fmt::Debug for UserFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFn")
            .field("name", &self.name)
            .field("args", &self.arg_names)
            .finish()
    }
}

/// One invocation of a user function.
pub struct FnRunner {
    func: Arc<UserFn>,
    args: Vec<Obj>,
    stdin: Option<Input>,
    stdout: Option<Output>,
    stderr: Option<Output>,
    task: Option<JoinHandle<Result<Option<Obj>, Control>>>,
    result: Option<Obj>,
}

impl FnRunner {
    pub fn new(func: Arc<UserFn>) -> Self {
        Self {
            func,
            args: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            task: None,
            result: None,
        }
    }
}

#[async_trait]
impl Runner for FnRunner {
    fn set_args(&mut self, args: &[Expr], scope: &Shell) -> Result<(), EvalError> {
        if args.len() != self.func.arg_names.len() {
            return Err(EvalError::Runtime(format!(
                "Wrong number of arguments for function '{}'. Expected {}, but given {}",
                self.func.name,
                self.func.arg_names.len(),
                args.len()
            )));
        }
        self.args = args
            .iter()
            .map(|arg| scope.eval_expr(arg))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn set_environ(&mut self, _environ: Vec<String>) {
        // subshells read the environment through the root scope; there
        // is nothing to replace here
    }

    fn set_stdin(&mut self, stdin: Input) {
        self.stdin = Some(stdin);
    }

    fn set_stdout(&mut self, stdout: Output) {
        self.stdout = Some(stdout);
    }

    fn set_stderr(&mut self, stderr: Output) {
        self.stderr = Some(stderr);
    }

    fn stdin(&self) -> Input {
        self.stdin.clone().unwrap_or_else(|| self.func.parent.stdin())
    }

    fn stdout(&self) -> Output {
        self.stdout
            .clone()
            .unwrap_or_else(|| self.func.parent.stdout())
    }

    fn stderr(&self) -> Output {
        self.stderr
            .clone()
            .unwrap_or_else(|| self.func.parent.stderr())
    }

    fn stdout_pipe(&mut self) -> Result<Input, EvalError> {
        let (reader, writer) = std::io::pipe()?;
        self.stdout = Some(Output::Sink(Arc::new(Sink::Pipe(writer))));
        Ok(Input::Pipe(Arc::new(reader)))
    }

    async fn start(&mut self) -> Result<(), Control> {
        let sub = Shell::new_subshell(&self.func.name, &self.func.parent);

        for (name, value) in self.func.arg_names.iter().zip(self.args.drain(..)) {
            sub.set_var(name, value);
        }

        if let Some(stdin) = self.stdin.take() {
            sub.set_stdin(stdin);
        }
        if let Some(stdout) = self.stdout.take() {
            sub.set_stdout(stdout);
        }
        if let Some(stderr) = self.stderr.take() {
            sub.set_stderr(stderr);
        }

        debug!("invoking function '{}'", self.func.name);
        let tree = self.func.tree.clone();
        self.task = Some(tokio::spawn(async move {
            sub.execute_tree(&tree, true).await
        }));
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), Control> {
        let Some(task) = self.task.take() else {
            return Err(EvalError::Runtime(format!(
                "function '{}' not started",
                self.func.name
            ))
            .into());
        };
        match task.await {
            Ok(Ok(value)) => {
                self.result = value;
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(EvalError::Runtime(format!(
                "function '{}' aborted: {}",
                self.func.name, join_err
            ))
            .into()),
        }
    }

    fn results(&mut self) -> Option<Obj> {
        self.result.take()
    }
}
