use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tmtc_protocol::{CodecError, ModelError};

/// An exception raised by the onboard software, with the database's
/// name and description attached when the id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardException {
    pub id: u32,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl fmt::Display for OnboardException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id)?,
            None => write!(f, "exception {}", self.id)?,
        }
        if let Some(desc) = self.description.as_deref().filter(|d| !d.is_empty()) {
            write!(f, ": {desc}")?;
        }
        Ok(())
    }
}

/// Failures reported by the command/telemetry engine collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("rejected onboard with exception {exception_id}")]
    Rejected { exception_id: u32 },
    #[error("{message}")]
    Command { message: String },
    #[error("no response before timeout")]
    Timeout,
    #[error("transfer: {0}")]
    Transfer(String),
    #[error("link disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum TmtcError {
    #[error("not connected to onboard software, call connect() first")]
    NotConnected,
    #[error("model query: {0}")]
    ModelQuery(#[from] ModelError),
    #[error("{context}: {message}")]
    Command { context: &'static str, message: String },
    #[error("{context}: no response within {timeout:?}")]
    CommandTimeout {
        context: &'static str,
        timeout: Duration,
    },
    #[error("transfer: {message}")]
    Transfer {
        message: String,
        exception: Option<OnboardException>,
    },
    #[error("{context}: onboard rejection {exception}")]
    Onboard {
        context: &'static str,
        exception: OnboardException,
    },
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("cannot write read-only parameter {0}")]
    ReadOnly(String),
    #[error("{action} expects {expected} argument(s), {given} given")]
    ArgumentCount {
        action: String,
        expected: usize,
        given: usize,
    },
    #[error("invalid row range {first_row}..={last_row}: {reason}")]
    InvalidRows {
        first_row: u32,
        last_row: u32,
        reason: &'static str,
    },
    #[error("{0}")]
    Shape(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl TmtcError {
    /// Communication-level failures, timeouts included.
    pub fn is_command_error(&self) -> bool {
        matches!(self, TmtcError::Command { .. } | TmtcError::CommandTimeout { .. })
    }

    /// The onboard exception carried by a rejection or a failed transfer.
    pub fn onboard_exception(&self) -> Option<&OnboardException> {
        match self {
            TmtcError::Onboard { exception, .. } => Some(exception),
            TmtcError::Transfer { exception, .. } => exception.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TmtcError>;
