//! Error kinds, control-flow carriers and exit codes.
//!
//! The tree walker threads a single error payload, [`Control`]: either a
//! plain failure ([`EvalError`]) or one of three carriers that steer the
//! walk — ignore, interrupt, or return-with-value. The walker dispatches
//! exhaustively on the variant.

use thiserror::Error;

use crate::parser::ParseError;

use super::object::Obj;

pub const ESUCCESS: i32 = 0;
pub const ENOTFOUND: i32 = 127;
pub const ENOTSTARTED: i32 = 255;

/// A plain evaluation failure.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Variable {name} not set on shell {shell}")]
    VarNotSet { name: String, shell: String },

    #[error("type error: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Index out of bounds. len({name}) == {len}, but given {index}")]
    IndexOutOfBounds {
        name: String,
        len: usize,
        index: i64,
    },

    #[error("command not found: {name}")]
    CommandNotFound { name: String },

    /// Child process failure; `status` carries its exit code.
    #[error("{msg}")]
    Exec { msg: String, status: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Runtime(String),
}

impl EvalError {
    /// Exit code carried by this error, when it has one.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            EvalError::CommandNotFound { .. } => Some(ENOTFOUND),
            EvalError::Exec { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

/// The tree walker's error payload.
#[derive(Debug, Error)]
pub enum Control {
    /// Skip the failed node and continue the walk (`-cmd` prefix).
    #[error("{0}")]
    Ignored(String),

    /// Abort the walk; loops convert the pending state into this.
    #[error("{0}")]
    Interrupted(String),

    /// Stop the nearest stopable walk, carrying the return value.
    #[error("return")]
    Return(Option<Obj>),

    #[error(transparent)]
    Fail(#[from] EvalError),
}

impl Control {
    /// Exit code as a `status` string, falling back to `default` when the
    /// error does not carry one.
    pub fn status_or(&self, default: &str) -> String {
        match self {
            Control::Fail(e) => e
                .status_code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| default.to_string()),
            _ => default.to_string(),
        }
    }
}

impl From<ParseError> for Control {
    fn from(e: ParseError) -> Self {
        Control::Fail(EvalError::Parse(e))
    }
}

impl From<std::io::Error> for Control {
    fn from(e: std::io::Error) -> Self {
        Control::Fail(EvalError::Io(e))
    }
}
