//! CI provenance captured into archives and rollback indexes.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::CiConfig;
use crate::credentials::CredentialProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub pipeline_id: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

impl Provenance {
    /// Read the CI variables named in `ci`. Outside CI the pipeline id falls
    /// back to a timestamped local id.
    pub fn collect(ci: &CiConfig, vars: &dyn CredentialProvider) -> Self {
        let read = |name: &str| vars.var(name).filter(|v| !v.is_empty());
        Self {
            pipeline_id: read(&ci.pipeline_id_env)
                .unwrap_or_else(|| format!("local-{}", Utc::now().format("%Y%m%d%H%M%S"))),
            commit_sha: read(&ci.commit_sha_env),
            branch: read(&ci.branch_env),
            triggered_by: read(&ci.user_env).or_else(|| read("USER")),
        }
    }

    pub fn local(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            commit_sha: None,
            branch: None,
            triggered_by: None,
        }
    }
}
