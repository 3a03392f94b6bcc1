use std::path::PathBuf;

use thiserror::Error;

use amux_protocol::{ErrorCode, SessionId};

#[derive(Error, Debug)]
pub enum AmuxError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("failed to launch agent process: {0}")]
    LaunchFailure(#[source] std::io::Error),

    #[error("working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("output stream already taken for session {0}")]
    StreamAlreadyTaken(SessionId),

    #[error("stream decode error: {0}")]
    StreamDecode(String),

    #[error("failed to kill process {pid}: {source}")]
    KillFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AmuxError {
    /// Convert to protocol error code and sanitized message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            AmuxError::SessionNotFound(_) => (ErrorCode::SessionNotFound, self.to_string()),
            AmuxError::LaunchFailure(_) => (ErrorCode::LaunchFailed, self.to_string()),
            AmuxError::InvalidWorkingDirectory(_) => {
                (ErrorCode::InvalidWorkingDirectory, self.to_string())
            }
            AmuxError::EmptyPrompt => (ErrorCode::InvalidRequest, self.to_string()),
            AmuxError::StreamAlreadyTaken(_) => (ErrorCode::InvalidRequest, self.to_string()),
            AmuxError::StreamDecode(_) => (ErrorCode::StreamDecode, self.to_string()),
            AmuxError::KillFailed { .. } => (ErrorCode::ServerError, self.to_string()),
            AmuxError::Io(_) => (ErrorCode::ServerError, "internal I/O error".to_string()),
        }
    }
}
