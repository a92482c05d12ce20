//! I/O redirection for command stages.
//!
//! Valid left-hand descriptors are stdout (1), stderr (2) or the implicit
//! stdout of a bare `>`. Stdin redirection is rejected. Locations dial
//! `tcp://`, `udp://` and `unix://` endpoints or open a local file
//! read-write (created with mode 0644). Sockets connect in blocking mode
//! so their descriptors can be handed to child processes directly.

use std::fs::OpenOptions;
use std::net::{TcpStream, UdpSocket};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::ast::{Expr, RedirectNode, REDIR_MAP_NO_VALUE, REDIR_MAP_SUPRESS};
use crate::interpreter::{EvalError, Obj, Shell};
use crate::runner::Runner;
use crate::streams::{Output, Sink};

/// Apply a command's redirections in order. Returns every stream opened
/// here; the caller keeps them alive until after the stage's wait.
pub(crate) fn apply_redirects(
    cmd: &mut dyn Runner,
    redirects: &[RedirectNode],
    shell: &Shell,
) -> Result<Vec<Output>, EvalError> {
    let mut close_after_wait = Vec::new();
    for redirect in redirects {
        build_redirect(cmd, redirect, shell, &mut close_after_wait)?;
    }
    Ok(close_after_wait)
}

fn build_redirect(
    cmd: &mut dyn Runner,
    redirect: &RedirectNode,
    shell: &Shell,
    close_after_wait: &mut Vec<Output>,
) -> Result<(), EvalError> {
    if redirect.left_fd > 2 || redirect.left_fd < REDIR_MAP_SUPRESS {
        return Err(EvalError::Runtime(format!(
            "Invalid file descriptor redirection: fd={}",
            redirect.left_fd
        )));
    }
    if redirect.right_fd > 2 || redirect.right_fd < REDIR_MAP_SUPRESS {
        return Err(EvalError::Runtime(format!(
            "Invalid file descriptor redirection: fd={}",
            redirect.right_fd
        )));
    }

    match redirect.left_fd {
        0 => Err(EvalError::Runtime(
            "Does not support stdin redirection".into(),
        )),
        1 => match redirect.right_fd {
            0 => Err(EvalError::Runtime("Invalid redirect mapping: 1 -> 0".into())),
            1 => Ok(()),
            2 => {
                cmd.set_stdout(cmd.stderr());
                Ok(())
            }
            REDIR_MAP_SUPRESS => {
                cmd.set_stdout(Output::Null);
                Ok(())
            }
            _ => {
                let location = open_required_location(redirect, shell)?;
                cmd.set_stdout(location.clone());
                close_after_wait.push(location);
                Ok(())
            }
        },
        2 => match redirect.right_fd {
            0 => Err(EvalError::Runtime("Invalid redirect mapping: 2 -> 0".into())),
            1 => {
                cmd.set_stderr(cmd.stdout());
                Ok(())
            }
            2 => Ok(()),
            REDIR_MAP_SUPRESS => {
                cmd.set_stderr(Output::Null);
                Ok(())
            }
            _ => {
                let location = open_required_location(redirect, shell)?;
                cmd.set_stderr(location.clone());
                close_after_wait.push(location);
                Ok(())
            }
        },
        REDIR_MAP_NO_VALUE => {
            let location = open_required_location(redirect, shell)?;
            cmd.set_stdout(location.clone());
            close_after_wait.push(location);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn open_required_location(redirect: &RedirectNode, shell: &Shell) -> Result<Output, EvalError> {
    match &redirect.location {
        Some(location) => open_location(shell, location),
        None => Err(EvalError::Runtime(format!(
            "Missing file in redirection: >[{}] <??>",
            redirect.left_fd
        ))),
    }
}

/// Evaluate and open a redirection target.
pub(crate) fn open_location(shell: &Shell, location: &Expr) -> Result<Output, EvalError> {
    let value = shell.eval_expr(location)?;
    let target = match &value {
        Obj::Str(s) => s,
        other => {
            return Err(EvalError::Runtime(format!(
                "Redirection to invalid object type: {} ({})",
                other,
                other.kind()
            )))
        }
    };

    if let Some(addr) = target.strip_prefix("tcp://") {
        if addr.split(':').count() != 2 {
            return Err(EvalError::Runtime(format!(
                "Invalid tcp/udp address: {}",
                target
            )));
        }
        let stream = TcpStream::connect(addr)?;
        return Ok(Output::Sink(Arc::new(Sink::Tcp(stream))));
    }

    if let Some(addr) = target.strip_prefix("udp://") {
        if addr.split(':').count() != 2 {
            return Err(EvalError::Runtime(format!(
                "Invalid tcp/udp address: {}",
                target
            )));
        }
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        return Ok(Output::Sink(Arc::new(Sink::Udp(socket))));
    }

    if let Some(path) = target.strip_prefix("unix://") {
        let stream = UnixStream::connect(path)?;
        return Ok(Output::Sink(Arc::new(Sink::Unix(stream))));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o644)
        .open(target)?;
    Ok(Output::Sink(Arc::new(Sink::File(file))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StringExpr;
    use crate::interpreter::{Control, Obj};
    use crate::lexer::Pos;
    use crate::streams::Input;
    use async_trait::async_trait;

    /// Records stream assignments so redirect wiring can be asserted
    /// without spawning anything.
    struct MockRunner {
        stdin: Input,
        stdout: Output,
        stderr: Output,
    }

    impl MockRunner {
        fn new() -> Self {
            Self {
                stdin: Input::Stdin,
                stdout: Output::Stdout,
                stderr: Output::Stderr,
            }
        }
    }

    #[async_trait]
    impl Runner for MockRunner {
        fn set_args(&mut self, _args: &[Expr], _scope: &Shell) -> Result<(), EvalError> {
            Ok(())
        }
        fn set_environ(&mut self, _environ: Vec<String>) {}
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
            Err(EvalError::Runtime("mock".into()))
        }
        async fn start(&mut self) -> Result<(), Control> {
            Ok(())
        }
        async fn wait(&mut self) -> Result<(), Control> {
            Ok(())
        }
        fn results(&mut self) -> Option<Obj> {
            None
        }
    }

    fn redirect(left: i32, right: i32, location: Option<&str>) -> RedirectNode {
        RedirectNode {
            pos: Pos { line: 1, column: 1 },
            left_fd: left,
            right_fd: right,
            location: location.map(|s| {
                Expr::Str(StringExpr {
                    pos: Pos { line: 1, column: 1 },
                    value: s.into(),
                    quoted: false,
                })
            }),
        }
    }

    #[test]
    fn stdin_redirection_is_rejected() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        let err =
            apply_redirects(&mut cmd, &[redirect(0, REDIR_MAP_NO_VALUE, None)], &shell)
                .unwrap_err();
        assert!(err.to_string().contains("stdin"));
    }

    #[test]
    fn out_of_range_descriptor_is_rejected() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        let err =
            apply_redirects(&mut cmd, &[redirect(3, REDIR_MAP_NO_VALUE, None)], &shell)
                .unwrap_err();
        assert!(err.to_string().contains("Invalid file descriptor"));

        let err =
            apply_redirects(&mut cmd, &[redirect(-3, REDIR_MAP_NO_VALUE, None)], &shell)
                .unwrap_err();
        assert!(err.to_string().contains("Invalid file descriptor"));
    }

    #[test]
    fn map_one_to_two_duplicates_stderr() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        apply_redirects(&mut cmd, &[redirect(1, 2, None)], &shell).unwrap();
        assert!(matches!(cmd.stdout, Output::Stderr));
    }

    #[test]
    fn map_two_to_one_duplicates_stdout() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        apply_redirects(&mut cmd, &[redirect(2, 1, None)], &shell).unwrap();
        assert!(matches!(cmd.stderr, Output::Stdout));
    }

    #[test]
    fn suppress_maps_to_null() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        apply_redirects(&mut cmd, &[redirect(2, REDIR_MAP_SUPRESS, None)], &shell).unwrap();
        assert!(matches!(cmd.stderr, Output::Null));
    }

    #[test]
    fn missing_location_is_rejected() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        let err = apply_redirects(
            &mut cmd,
            &[redirect(REDIR_MAP_NO_VALUE, REDIR_MAP_NO_VALUE, None)],
            &shell,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Missing file in redirection"));
    }

    #[test]
    fn bare_redirect_opens_file() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let closers = apply_redirects(
            &mut cmd,
            &[redirect(
                REDIR_MAP_NO_VALUE,
                REDIR_MAP_NO_VALUE,
                Some(path.to_str().unwrap()),
            )],
            &shell,
        )
        .unwrap();
        assert_eq!(closers.len(), 1);
        assert!(matches!(cmd.stdout, Output::Sink(_)));
        assert!(path.exists());
    }

    #[test]
    fn malformed_tcp_address_is_rejected() {
        let shell = Shell::new_bare_root();
        let mut cmd = MockRunner::new();
        let err = apply_redirects(
            &mut cmd,
            &[redirect(
                REDIR_MAP_NO_VALUE,
                REDIR_MAP_NO_VALUE,
                Some("tcp://nohost"),
            )],
            &shell,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid tcp/udp address"));
    }
}
