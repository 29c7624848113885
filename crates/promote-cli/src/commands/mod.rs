pub mod config;
pub mod flags;
pub mod phases;
pub mod rollback;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use promote_core::DeploymentUnit;

/// Read and validate a BOM file.
pub fn load_unit(path: &Path) -> anyhow::Result<DeploymentUnit> {
    DeploymentUnit::from_file(path).with_context(|| format!("loading BOM {}", path.display()))
}
