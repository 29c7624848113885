//! Credential provider.
//!
//! Secrets never appear in configuration files. Configuration names the
//! environment variables that hold them and a provider resolves those names
//! once, before any backend is constructed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Names of the variables holding a username/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVars {
    pub username_env: String,
    pub password_env: String,
}

/// Source of named secret values.
pub trait CredentialProvider: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;

    /// Like [`var`](Self::var) but an unset or empty value is an error
    /// naming the variable.
    fn require(&self, name: &str) -> CoreResult<String> {
        self.var(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::MissingCredential(name.to_string()))
    }
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of values.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    vars: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// A resolved username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn resolve(provider: &dyn CredentialProvider, vars: &CredentialVars) -> CoreResult<Self> {
        Ok(Self {
            username: provider.require(&vars.username_env)?,
            password: provider.require(&vars.password_env)?,
        })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
