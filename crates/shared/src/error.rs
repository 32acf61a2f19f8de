use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Connection,
    SessionLost,
    ProtocolMismatch,
    UnrecognizedCommand,
    Validation,
}

#[derive(Debug, Error)]
pub enum ShowError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("remote session lost: {0}")]
    SessionLost(#[from] io::Error),
    #[error("could not find \"{pattern}\" in \"{text}\"")]
    ProtocolMismatch { pattern: String, text: String },
    #[error("command {0:?} could not be interpreted")]
    UnrecognizedCommand(String),
    #[error("no channel with id {0}")]
    UnknownChannel(usize),
    #[error("expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("invalid command pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid argument {0:?}")]
    InvalidArgument(String),
}

impl ShowError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection(_) => ErrorCode::Connection,
            Self::SessionLost(_) => ErrorCode::SessionLost,
            Self::ProtocolMismatch { .. } => ErrorCode::ProtocolMismatch,
            Self::UnrecognizedCommand(_) => ErrorCode::UnrecognizedCommand,
            Self::UnknownChannel(_)
            | Self::LengthMismatch { .. }
            | Self::InvalidPattern { .. }
            | Self::InvalidArgument(_) => ErrorCode::Validation,
        }
    }

    /// Transport failures are the only errors that end a session.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }
}

pub type ShowResult<T> = Result<T, ShowError>;
