//! Error types for the archive manager.

use promote_storage::StorageError;
use thiserror::Error;

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error in {key}: {message}")]
    Deserialize { key: String, message: String },
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Storage(e) if e.is_not_found())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::Storage(e) if e.is_retryable())
    }
}
