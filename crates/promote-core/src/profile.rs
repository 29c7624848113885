//! Deployment profiles.
//!
//! A profile names the capability flags to compile for import, the kind of
//! deployment it drives, and for baseline profiles the table of entity types
//! that make up a full baseline.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::flags::{self, CompiledFlags, ProfileFlags};

/// Baseline deployments carry every instance of the profile's entity types;
/// functional deployments carry the specific entities listed in the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Baseline,
    Functional,
}

impl DeploymentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentKind::Baseline => "baseline",
            DeploymentKind::Functional => "functional",
        }
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation handling passed to the import command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum I18nMode {
    Strict,
    LenientCharset,
    LenientLocale,
}

impl I18nMode {
    /// Value of the utility's `-i18n` argument.
    pub fn as_arg(self) -> &'static str {
        match self {
            I18nMode::Strict => "none",
            I18nMode::LenientCharset => "charset",
            I18nMode::LenientLocale => "locale",
        }
    }
}

/// Reference data handling passed to the import command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefdataMode {
    NoChange,
    Install,
}

impl RefdataMode {
    /// Value of the utility's `-refdata` argument.
    pub fn as_arg(self) -> &'static str {
        match self {
            RefdataMode::NoChange => "nochange",
            RefdataMode::Install => "install",
        }
    }
}

/// An entity type extracted wholesale by a baseline profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub kind: DeploymentKind,
    #[serde(default)]
    pub description: Option<String>,
    pub flags: ProfileFlags,
    #[serde(default)]
    pub entities: Vec<EntityType>,
    #[serde(default)]
    pub i18n: Option<I18nMode>,
    #[serde(default)]
    pub refdata: Option<RefdataMode>,
}

impl Profile {
    pub fn from_toml(content: &str, origin: &str) -> CoreResult<Self> {
        let profile: Profile = toml::from_str(content).map_err(|e| CoreError::parse(origin, e))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::read(path, e))?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Load `<dir>/<name>.toml` and check that it declares the same name.
    pub fn load(dir: &Path, name: &str) -> CoreResult<Self> {
        let profile = Self::from_file(&dir.join(format!("{name}.toml")))?;
        if profile.name != name {
            return Err(CoreError::InvalidProfile(format!(
                "file for profile `{name}` declares name `{}`",
                profile.name
            )));
        }
        Ok(profile)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidProfile("name is empty".into()));
        }
        if self.kind == DeploymentKind::Baseline && self.entities.is_empty() {
            return Err(CoreError::InvalidProfile(format!(
                "baseline profile `{}` lists no entity types",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.id) {
                return Err(CoreError::InvalidProfile(format!(
                    "entity type {} listed twice",
                    entity.id
                )));
            }
        }
        Ok(())
    }

    pub fn compile(&self) -> CoreResult<CompiledFlags> {
        flags::compile(&self.flags)
    }

    pub fn i18n_mode(&self) -> I18nMode {
        self.i18n.unwrap_or(match self.kind {
            DeploymentKind::Baseline => I18nMode::Strict,
            DeploymentKind::Functional => I18nMode::LenientCharset,
        })
    }

    pub fn refdata_mode(&self) -> RefdataMode {
        self.refdata.unwrap_or(RefdataMode::NoChange)
    }
}
