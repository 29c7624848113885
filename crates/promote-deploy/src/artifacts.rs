//! CI pipeline artifacts: the first place rollback looks for an archive.
//!
//! A pipeline's `archive` job uploads the state directory as job artifacts.
//! Artifacts expire, so an absent pipeline, job or file is a miss rather
//! than a failure.

use std::path::PathBuf;
use std::time::Duration;

use promote_archive::ObjectReader;
use promote_core::config::{ArtifactSourceKind, ArtifactsConfig};
use promote_core::{CoreError, CredentialProvider};
use promote_storage::{LocalStorage, StorageError, StorageResult};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum ArtifactSource {
    Disabled,
    /// Downloaded artifacts laid out as `<root>/<pipeline_id>/<artifact_root>/`.
    Directory(DirectoryArtifacts),
    Gitlab(GitlabArtifacts),
}

#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
    pub root: PathBuf,
    pub artifact_root: String,
}

/// Job artifacts served by the GitLab REST API (v4).
#[derive(Debug, Clone)]
pub struct GitlabArtifacts {
    client: reqwest::Client,
    api_url: String,
    project_id: String,
    token: String,
    archive_job: String,
    artifact_root: String,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct Job {
    id: u64,
    name: String,
}

impl ArtifactSource {
    pub fn from_config(config: &ArtifactsConfig, provider: &dyn CredentialProvider) -> StorageResult<Self> {
        match config.source {
            ArtifactSourceKind::None => Ok(ArtifactSource::Disabled),
            ArtifactSourceKind::Directory => {
                let root = config.directory.clone().ok_or_else(|| {
                    CoreError::InvalidConfig("ci.artifacts.directory is not set".into())
                })?;
                Ok(ArtifactSource::Directory(DirectoryArtifacts {
                    root,
                    artifact_root: config.artifact_root.clone(),
                }))
            }
            ArtifactSourceKind::Gitlab => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()
                    .map_err(|e| StorageError::Transport(e.to_string()))?;
                Ok(ArtifactSource::Gitlab(GitlabArtifacts {
                    client,
                    api_url: provider.require(&config.api_url_env)?.trim_end_matches('/').to_string(),
                    project_id: provider.require(&config.project_id_env)?,
                    token: provider.require(&config.token_env)?,
                    archive_job: config.archive_job.clone(),
                    artifact_root: config.artifact_root.trim_matches('/').to_string(),
                    timeout_secs: config.timeout_secs,
                }))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ArtifactSource::Disabled)
    }

    /// Artifacts of one pipeline, or `None` when it has none (any more).
    pub async fn open(&self, pipeline_id: &str) -> StorageResult<Option<ArtifactHandle>> {
        match self {
            ArtifactSource::Disabled => Ok(None),
            ArtifactSource::Directory(dir) => {
                let base = dir.root.join(pipeline_id).join(&dir.artifact_root);
                if tokio::fs::try_exists(&base)
                    .await
                    .map_err(|e| StorageError::Io(e.to_string()))?
                {
                    Ok(Some(ArtifactHandle::Directory(LocalStorage::new(base))))
                } else {
                    debug!(path = %base.display(), "no downloaded artifacts for pipeline");
                    Ok(None)
                }
            }
            ArtifactSource::Gitlab(gitlab) => gitlab.open(pipeline_id).await,
        }
    }
}

impl GitlabArtifacts {
    fn jobs_url(&self, pipeline_id: &str) -> String {
        format!(
            "{}/projects/{}/pipelines/{pipeline_id}/jobs?scope[]=success&per_page=100",
            self.api_url, self.project_id
        )
    }

    fn artifacts_base(&self, job_id: u64) -> String {
        format!(
            "{}/projects/{}/jobs/{job_id}/artifacts/{}/",
            self.api_url, self.project_id, self.artifact_root
        )
    }

    async fn open(&self, pipeline_id: &str) -> StorageResult<Option<ArtifactHandle>> {
        let url = self.jobs_url(pipeline_id);
        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StorageError::Remote {
                operation: "list pipeline jobs".into(),
                message: format!("{url} returned {}", response.status()),
            });
        }
        let jobs: Vec<Job> = response
            .json()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;
        let Some(job) = jobs.into_iter().find(|j| j.name == self.archive_job) else {
            debug!(pipeline = %pipeline_id, job = %self.archive_job, "pipeline has no successful archive job");
            return Ok(None);
        };
        debug!(pipeline = %pipeline_id, job = job.id, "found archive job");
        Ok(Some(ArtifactHandle::Gitlab {
            client: self.client.clone(),
            token: self.token.clone(),
            base_url: self.artifacts_base(job.id),
            timeout_secs: self.timeout_secs,
        }))
    }
}

/// Read access to one pipeline's artifacts.
#[derive(Debug, Clone)]
pub enum ArtifactHandle {
    Directory(LocalStorage),
    Gitlab {
        client: reqwest::Client,
        token: String,
        base_url: String,
        timeout_secs: u64,
    },
}

impl ObjectReader for ArtifactHandle {
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        match self {
            ArtifactHandle::Directory(store) => store.get(key).await,
            ArtifactHandle::Gitlab {
                client,
                token,
                base_url,
                timeout_secs,
            } => {
                let url = format!("{base_url}{key}");
                let response = client
                    .get(&url)
                    .header("PRIVATE-TOKEN", token)
                    .send()
                    .await
                    .map_err(|e| request_error(e, *timeout_secs))?;
                match response.status() {
                    StatusCode::NOT_FOUND => Err(StorageError::NotFound(url)),
                    status if status.is_success() => {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| request_error(e, *timeout_secs))?;
                        Ok(bytes.to_vec())
                    }
                    status => Err(StorageError::Remote {
                        operation: "download artifact".into(),
                        message: format!("{url} returned {status}"),
                    }),
                }
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ArtifactHandle::Directory(store) => format!("artifacts in {}", store.root().display()),
            ArtifactHandle::Gitlab { base_url, .. } => base_url.clone(),
        }
    }
}

fn request_error(err: reqwest::Error, secs: u64) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout {
            operation: "artifact request".into(),
            secs,
        }
    } else {
        StorageError::Transport(err.to_string())
    }
}
