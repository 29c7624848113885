//! Error types for execution backends.

use promote_core::CoreError;
use thiserror::Error;

/// Result type alias for execution backend operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The connection to the execution host could not be established.
    #[error("transport to {host} failed: {message}")]
    Transport { host: String, message: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The migration utility ran and reported failure.
    #[error("{operation} exited with {status}: {stderr}")]
    ExternalTool {
        operation: String,
        status: String,
        stderr: String,
    },

    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("io error: {0}")]
    Io(String),

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl ExecError {
    /// Transport and timeout failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Transport { .. } | ExecError::Timeout { .. })
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}
