//! Error types for storage backends.

use promote_core::CoreError;
use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid storage key `{0}`")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("object store unreachable: {0}")]
    Transport(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("object store {operation} failed: {message}")]
    Remote { operation: String, message: String },

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transport(_) | StorageError::Timeout { .. })
    }
}
