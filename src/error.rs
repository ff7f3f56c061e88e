use std::fmt::Display;
use std::io;

use thiserror::Error;

use crate::process::Status;

/// An main error type used in [crate].
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error {0}")]
    Io(#[from] io::Error),
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("pty error {origin} while {message}")]
    Pty { message: String, origin: String },
    #[error("can't parse a regex expression: {0}")]
    RegexParsing(#[from] regex::Error),
    #[error("unknown text encoding {0:?}")]
    UnknownEncoding(String),
    /// An expectation entry whose response is neither a literal nor a callback.
    #[error("expectation at index {index} must have a response to send or compute: {entry:?}")]
    InvalidResponseType { index: usize, entry: String },
    /// The child exited with a non-zero status.
    ///
    /// It carries everything which was captured so a caller can diagnose the failure.
    #[error("process exited with {status}")]
    ProcessFailure { output: String, status: Status },
    /// A run was interrupted and its child torn down.
    ///
    /// The output is whatever was accumulated so far; it may be incomplete.
    #[error("run was interrupted")]
    Interrupted { output: String },
}

impl Error {
    pub(crate) fn pty(message: impl Into<String>, err: impl Display) -> Error {
        Self::Pty {
            message: message.into(),
            origin: err.to_string(),
        }
    }

    /// Returns a captured output if the error carries one.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::ProcessFailure { output, .. } | Error::Interrupted { output } => Some(output),
            _ => None,
        }
    }
}

pub(crate) fn to_pty_error<E: Display>(message: &'static str) -> impl FnOnce(E) -> Error {
    move |e: E| Error::pty(message, e)
}

pub type Result<T> = std::result::Result<T, Error>;
