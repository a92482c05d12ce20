//! External command runner.
//!
//! Resolves a command name against PATH at construction time, so the
//! evaluator can distinguish "not found" (and fall back to bindfn) from
//! later start failures. Spawning uses tokio's process support; capture
//! outputs are drained by spawned tasks that `wait` joins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ast::Expr;
use crate::interpreter::{Control, EvalError, Obj, Shell, ENOTSTARTED};
use crate::streams::{CaptureBuffer, Input, Output, Sink};

use super::Runner;

/// Runs one external process.
pub struct CmdRunner {
    name: String,
    path: PathBuf,
    args: Vec<String>,
    environ: Option<Vec<String>>,
    stdin: Input,
    stdout: Output,
    stderr: Output,
    child: Option<Child>,
    copiers: Vec<JoinHandle<()>>,
    start_err: Option<String>,
}

impl CmdRunner {
    /// Resolve `name` on PATH. Fails with `CommandNotFound` when no
    /// executable matches; the evaluator then consults the bindfn table.
    pub fn new(name: &str) -> Result<Self, EvalError> {
        let path = lookup_path(name)?;
        debug!("resolved command '{}' to {}", name, path.display());
        Ok(Self {
            name: name.to_string(),
            path,
            args: Vec::new(),
            environ: None,
            stdin: Input::Stdin,
            stdout: Output::Stdout,
            stderr: Output::Stderr,
            child: None,
            copiers: Vec::new(),
            start_err: None,
        })
    }

    fn spawn_child(&mut self) -> Result<(), EvalError> {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);

        if let Some(environ) = &self.environ {
            cmd.env_clear();
            for entry in environ {
                if let Some((key, value)) = entry.split_once('=') {
                    cmd.env(key, value);
                }
            }
        }

        cmd.stdin(self.stdin.to_stdio()?);
        let (stdout_io, stdout_capture) = self.stdout.to_stdio()?;
        let (stderr_io, stderr_capture) = self.stderr.to_stdio()?;
        cmd.stdout(stdout_io);
        cmd.stderr(stderr_io);

        let mut child = cmd.spawn().map_err(|e| EvalError::Exec {
            msg: format!("{}: {}", self.name, e),
            status: ENOTSTARTED,
        })?;

        if let Some(buffer) = stdout_capture {
            if let Some(stdout) = child.stdout.take() {
                self.copiers.push(drain_into(stdout, buffer));
            }
        }
        if let Some(buffer) = stderr_capture {
            if let Some(stderr) = child.stderr.take() {
                self.copiers.push(drain_into(stderr, buffer));
            }
        }

        // release our copies of any wired pipe ends; readers must see
        // EOF once the child exits
        self.stdin = Input::Stdin;
        self.stdout = Output::Null;
        self.stderr = Output::Null;

        self.child = Some(child);
        Ok(())
    }
}

#[async_trait]
impl Runner for CmdRunner {
    fn set_args(&mut self, args: &[Expr], scope: &Shell) -> Result<(), EvalError> {
        self.args.clear();
        for arg in args {
            match scope.eval_expr(arg)? {
                Obj::Str(s) => self.args.push(s),
                Obj::List(items) => {
                    // a list spreads into one argument per element
                    for item in items {
                        self.args.push(item.to_string());
                    }
                }
                other => {
                    return Err(EvalError::TypeMismatch {
                        expected: "string",
                        got: other.kind(),
                    })
                }
            }
        }
        Ok(())
    }

    fn set_environ(&mut self, environ: Vec<String>) {
        self.environ = Some(environ);
    }

    fn set_stdin(&mut self, stdin: Input) {
        self.stdin = stdin;
    }

    fn set_stdout(&mut self, stdout: Output) {
        self.stdout = stdout;
    }

    fn set_stderr(&mut self, stderr: Output) {
        self.stderr = stderr;
    }

    fn stdin(&self) -> Input {
        self.stdin.clone()
    }

    fn stdout(&self) -> Output {
        self.stdout.clone()
    }

    fn stderr(&self) -> Output {
        self.stderr.clone()
    }

    fn stdout_pipe(&mut self) -> Result<Input, EvalError> {
        let (reader, writer) = std::io::pipe()?;
        self.stdout = Output::Sink(Arc::new(Sink::Pipe(writer)));
        Ok(Input::Pipe(Arc::new(reader)))
    }

    async fn start(&mut self) -> Result<(), Control> {
        let result = self.spawn_child();
        if let Err(err) = &result {
            self.start_err = Some(err.to_string());
        }
        result.map_err(Control::from)
    }

    async fn wait(&mut self) -> Result<(), Control> {
        if let Some(msg) = self.start_err.take() {
            return Err(EvalError::Runtime(msg).into());
        }
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => {
                return Err(
                    EvalError::Runtime(format!("{}: command not started", self.name)).into(),
                )
            }
        };

        let status = child.wait().await.map_err(EvalError::from)?;
        for copier in self.copiers.drain(..) {
            let _ = copier.await;
        }
        self.child = None;

        if status.success() {
            return Ok(());
        }
        let code = status.code().unwrap_or(ENOTSTARTED);
        Err(EvalError::Exec {
            msg: format!("exit status {}", code),
            status: code,
        }
        .into())
    }

    fn results(&mut self) -> Option<Obj> {
        None
    }
}

fn drain_into<R>(mut reader: R, buffer: CaptureBuffer) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut data = Vec::new();
        let _ = reader.read_to_end(&mut data).await;
        let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend_from_slice(&data);
    })
}

/// PATH lookup. Names containing a slash resolve as given.
fn lookup_path(name: &str) -> Result<PathBuf, EvalError> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        if is_executable(&path) {
            return Ok(path);
        }
        return Err(EvalError::CommandNotFound {
            name: name.to_string(),
        });
    }

    let search = std::env::var("PATH").unwrap_or_default();
    for dir in search.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(EvalError::CommandNotFound {
        name: name.to_string(),
    })
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
