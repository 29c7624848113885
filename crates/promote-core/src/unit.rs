//! Deployment units (bills of materials).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Rollback marker that selects the most recent local run.
pub const LOCAL_MARKER: &str = "local";

/// An entity selected for migration. Without a reference code the whole
/// entity type is selected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
}

impl EntityRef {
    pub fn new(entity_id: u32, reference_code: impl Into<String>) -> Self {
        Self {
            entity_id,
            reference_code: Some(reference_code.into()),
        }
    }

    pub fn whole_type(entity_id: u32) -> Self {
        Self {
            entity_id,
            reference_code: None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference_code {
            Some(code) => write!(f, "{}/{}", self.entity_id, code),
            None => write!(f, "{}/*", self.entity_id),
        }
    }
}

/// Which prior run a rollback restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RollbackReference {
    LatestLocal,
    Pipeline(String),
}

impl From<String> for RollbackReference {
    fn from(value: String) -> Self {
        if value.trim() == LOCAL_MARKER {
            RollbackReference::LatestLocal
        } else {
            RollbackReference::Pipeline(value.trim().to_string())
        }
    }
}

impl From<RollbackReference> for String {
    fn from(value: RollbackReference) -> Self {
        match value {
            RollbackReference::LatestLocal => LOCAL_MARKER.to_string(),
            RollbackReference::Pipeline(id) => id,
        }
    }
}

impl fmt::Display for RollbackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackReference::LatestLocal => f.write_str(LOCAL_MARKER),
            RollbackReference::Pipeline(id) => f.write_str(id),
        }
    }
}

/// A single promotion request. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    pub version: String,
    #[serde(default)]
    pub change_request: Option<String>,
    pub source: String,
    pub target: String,
    pub profile: String,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub rollback_reference: Option<RollbackReference>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl DeploymentUnit {
    pub fn from_toml(content: &str, origin: &str) -> CoreResult<Self> {
        let unit: DeploymentUnit =
            toml::from_str(content).map_err(|e| CoreError::parse(origin, e))?;
        unit.validate()?;
        Ok(unit)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::read(path, e))?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Structural checks. Environment policy lives in the governance validator.
    pub fn validate(&self) -> CoreResult<()> {
        semver::Version::parse(&self.version).map_err(|e| {
            CoreError::InvalidUnit(format!("version `{}` is not semantic: {e}", self.version))
        })?;

        for (field, value) in [
            ("source", &self.source),
            ("target", &self.target),
            ("profile", &self.profile),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidUnit(format!("{field} is empty")));
            }
        }

        if self.source == self.target {
            return Err(CoreError::InvalidUnit(format!(
                "source and target are both `{}`",
                self.source
            )));
        }

        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity) {
                return Err(CoreError::InvalidUnit(format!(
                    "entity {entity} listed twice"
                )));
            }
        }

        if let Some(RollbackReference::Pipeline(id)) = &self.rollback_reference {
            if id.is_empty() {
                return Err(CoreError::InvalidUnit("rollback reference is empty".into()));
            }
        }
        Ok(())
    }

    /// Change request label used in archive keys.
    pub fn change_request_label(&self) -> &str {
        self.change_request.as_deref().unwrap_or("baseline")
    }
}
