//! Stream handles wired between the evaluator, runners and children.
//!
//! The evaluator owns an [`Input`] and two [`Output`]s per scope. Runners
//! receive clones; when a child process spawns, each handle converts into
//! a `Stdio` by duplicating the underlying descriptor, so the interpreter
//! keeps its own copy for deferred close. Capture outputs have no
//! descriptor: the child gets a pipe and a task drains it into the
//! buffer.

use std::fs::File;
use std::io::{self, PipeReader, PipeWriter, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

/// Shared capture buffer filled by drain tasks.
pub type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

/// Where a runner reads its standard input from.
#[derive(Debug, Clone)]
pub enum Input {
    /// The interpreter's own stdin.
    Stdin,
    /// Read end of an OS pipe (a pipeline stage link).
    Pipe(Arc<PipeReader>),
}

impl Input {
    pub fn to_stdio(&self) -> io::Result<Stdio> {
        match self {
            Input::Stdin => Ok(Stdio::inherit()),
            Input::Pipe(reader) => Ok(reader.try_clone()?.into()),
        }
    }
}

/// A writable endpoint opened for redirection or pipeline wiring.
#[derive(Debug)]
pub enum Sink {
    File(File),
    Tcp(TcpStream),
    Udp(UdpSocket),
    Unix(UnixStream),
    Pipe(PipeWriter),
}

impl Sink {
    fn clone_fd(&self) -> io::Result<Stdio> {
        let fd = match self {
            Sink::File(f) => f.as_fd().try_clone_to_owned()?,
            Sink::Tcp(s) => s.as_fd().try_clone_to_owned()?,
            Sink::Udp(s) => s.as_fd().try_clone_to_owned()?,
            Sink::Unix(s) => s.as_fd().try_clone_to_owned()?,
            Sink::Pipe(w) => w.as_fd().try_clone_to_owned()?,
        };
        Ok(Stdio::from(fd))
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            Sink::File(f) => {
                let mut w: &File = f;
                w.write_all(buf)
            }
            Sink::Tcp(s) => {
                let mut w: &TcpStream = s;
                w.write_all(buf)
            }
            Sink::Unix(s) => {
                let mut w: &UnixStream = s;
                w.write_all(buf)
            }
            Sink::Pipe(p) => {
                let mut w: &PipeWriter = p;
                w.write_all(buf)
            }
            Sink::Udp(s) => s.send(buf).map(|_| ()),
        }
    }
}

/// Where a runner writes one of its standard streams.
#[derive(Debug, Clone)]
pub enum Output {
    /// The interpreter's own stdout.
    Stdout,
    /// The interpreter's own stderr.
    Stderr,
    /// File, socket or pipe opened by a redirection or pipeline link.
    Sink(Arc<Sink>),
    /// In-memory capture (exec-assign).
    Capture(CaptureBuffer),
    /// Discard.
    Null,
}

impl Output {
    /// New capture output plus the buffer it fills.
    pub fn capture() -> (Output, CaptureBuffer) {
        let buffer: CaptureBuffer = Arc::new(Mutex::new(Vec::new()));
        (Output::Capture(buffer.clone()), buffer)
    }

    /// Convert to a child `Stdio`. Capture outputs also return the buffer
    /// the caller must drain the child's pipe into.
    pub fn to_stdio(&self) -> io::Result<(Stdio, Option<CaptureBuffer>)> {
        match self {
            Output::Stdout => {
                let fd = io::stdout().as_fd().try_clone_to_owned()?;
                Ok((Stdio::from(fd), None))
            }
            Output::Stderr => {
                let fd = io::stderr().as_fd().try_clone_to_owned()?;
                Ok((Stdio::from(fd), None))
            }
            Output::Sink(sink) => Ok((sink.clone_fd()?, None)),
            Output::Capture(buffer) => Ok((Stdio::piped(), Some(buffer.clone()))),
            Output::Null => Ok((Stdio::null(), None)),
        }
    }

    /// Interpreter-level write (dump output, diagnostics).
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            Output::Stdout => io::stdout().lock().write_all(buf),
            Output::Stderr => io::stderr().lock().write_all(buf),
            Output::Sink(sink) => sink.write_all(buf),
            Output::Capture(buffer) => {
                let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
                guard.extend_from_slice(buf);
                Ok(())
            }
            Output::Null => Ok(()),
        }
    }
}
