//! Error types for orchestration and rollback.

use promote_archive::ArchiveError;
use promote_core::CoreError;
use promote_exec::ExecError;
use promote_storage::StorageError;
use thiserror::Error;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Coarse error classes reported to callers and CI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Validation,
    Transport,
    ExternalTool,
    NotFound,
    SafetyCheck,
    Integrity,
    Internal,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("governance validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("bundle metadata not found at {0}; run extract first")]
    MetadataNotFound(String),

    #[error("import record not found at {0}; run import first")]
    ImportNotFound(String),

    #[error("{0}")]
    Mismatch(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("cannot decode {key}: {message}")]
    Record { key: String, message: String },

    #[error("safety check failed: archive was deployed to `{archived}`, rollback requested for `{requested}`")]
    SafetyCheck { archived: String, requested: String },

    #[error("archive {archive} cannot be restored: its import failed ({reason})")]
    NotRestorable { archive: String, reason: String },

    #[error("no archive found for rollback reference `{reference}`: {}", .misses.join("; "))]
    ArchiveNotFound { reference: String, misses: Vec<String> },

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("worker task failed: {0}")]
    Task(String),
}

impl DeployError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeployError::Config(_) | DeployError::Mismatch(_) => ErrorClass::Configuration,
            DeployError::Validation(_) => ErrorClass::Validation,
            DeployError::Exec(e) => match e {
                ExecError::Transport { .. } | ExecError::Timeout { .. } => ErrorClass::Transport,
                ExecError::ExternalTool { .. } => ErrorClass::ExternalTool,
                ExecError::Spawn { .. } | ExecError::Config(_) => ErrorClass::Configuration,
                ExecError::Io(_) => ErrorClass::Internal,
            },
            DeployError::Storage(e) => storage_class(e),
            DeployError::Archive(e) => match e {
                ArchiveError::Storage(e) => storage_class(e),
                ArchiveError::Integrity(_)
                | ArchiveError::Serialize(_)
                | ArchiveError::Deserialize { .. } => ErrorClass::Integrity,
            },
            DeployError::MetadataNotFound(_)
            | DeployError::ImportNotFound(_)
            | DeployError::ArchiveNotFound { .. } => ErrorClass::NotFound,
            DeployError::SafetyCheck { .. } | DeployError::NotRestorable { .. } => ErrorClass::SafetyCheck,
            DeployError::Integrity(_) | DeployError::Record { .. } => ErrorClass::Integrity,
            DeployError::IllegalTransition { .. } | DeployError::Task(_) => ErrorClass::Internal,
        }
    }

    /// Only transport-class failures (including timeouts) are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }
}

fn storage_class(err: &StorageError) -> ErrorClass {
    match err {
        StorageError::NotFound(_) => ErrorClass::NotFound,
        StorageError::Transport(_) | StorageError::Timeout { .. } => ErrorClass::Transport,
        StorageError::Remote { .. } => ErrorClass::ExternalTool,
        StorageError::InvalidKey(_) | StorageError::Config(_) => ErrorClass::Configuration,
        StorageError::Io(_) => ErrorClass::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_transport() {
        let timeout = DeployError::Exec(ExecError::Timeout {
            operation: "import".into(),
            secs: 30,
        });
        assert_eq!(timeout.class(), ErrorClass::Transport);
        assert!(timeout.is_retryable());

        let tool = DeployError::Exec(ExecError::ExternalTool {
            operation: "import".into(),
            status: "status 1".into(),
            stderr: "bad bundle".into(),
        });
        assert_eq!(tool.class(), ErrorClass::ExternalTool);
        assert!(!tool.is_retryable());

        let safety = DeployError::SafetyCheck {
            archived: "a".into(),
            requested: "b".into(),
        };
        assert_eq!(safety.class(), ErrorClass::SafetyCheck);
        assert!(!safety.is_retryable());
    }

    #[test]
    fn archive_not_found_is_not_found() {
        let err = DeployError::Archive(ArchiveError::Storage(StorageError::NotFound("k".into())));
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert_eq!(
            DeployError::MetadataNotFound("metadata/functional-metadata.json".into()).class(),
            ErrorClass::NotFound
        );
    }
}
