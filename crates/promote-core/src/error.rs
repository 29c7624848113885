//! Error types for promote core.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Configuration-time errors: profiles, flags, units, config files, credentials.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("profile does not set capability `{0}`")]
    MissingCapability(String),

    #[error("unknown capability `{0}`")]
    UnknownCapability(String),

    #[error("capability `{enabled}` requires `{requires}` to be enabled")]
    Constraint {
        enabled: &'static str,
        requires: &'static str,
    },

    #[error("invalid compiled flags: {0}")]
    InvalidFlags(String),

    #[error("credential variable `{0}` is not set")]
    MissingCredential(String),

    #[error("invalid deployment unit: {0}")]
    InvalidUnit(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

impl CoreError {
    pub(crate) fn read(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        CoreError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(path: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Parse {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}
