//! Rollback engine: find a previous archive and replay it unchanged.
//!
//! Resolution tries an ordered list of tiers and stops at the first hit:
//! CI pipeline artifacts, then the object store, then the local archive
//! directory. The `local` marker skips the search and reads the latest
//! local index. Whatever the source, the index target must match the
//! requested target before anything is imported, and bundles are imported
//! with the flags string stored in the archive, never a recompiled one.
//! Archives of failed imports are refused.

use std::fmt;
use std::sync::Arc;

use promote_archive::{
    ArchiveResult, BucketReader, LoadedArchive, ObjectReader, RemoteArchive, load_archive, read_index,
};
use promote_core::types::layout;
use promote_core::{
    CompiledFlags, CoreError, CredentialProvider, DeploymentUnit, ImportOutcome, PromoteConfig,
    RollbackIndex, RollbackReference, StorageKind,
};
use promote_exec::{ExecutionBackend, ImportResult};
use promote_storage::{LocalStorage, ObjectStorage, object_store_client};
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactSource;
use crate::error::{DeployError, DeployResult};
use crate::orchestrator::import_bundles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    PipelineArtifacts,
    ObjectStore,
    LocalArchive,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::PipelineArtifacts => f.write_str("tier 1 (pipeline artifacts)"),
            Tier::ObjectStore => f.write_str("tier 2 (object store)"),
            Tier::LocalArchive => f.write_str("tier 3 (local archive)"),
        }
    }
}

pub const TIER_ORDER: [Tier; 3] = [Tier::PipelineArtifacts, Tier::ObjectStore, Tier::LocalArchive];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    Hit,
    Miss(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierAttempt {
    pub tier: Tier,
    pub outcome: TierOutcome,
}

/// Where the replayed archive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    LatestLocal,
    Tier(Tier),
}

#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub reference: RollbackReference,
    pub resolved_from: ResolvedFrom,
    pub index: RollbackIndex,
    pub flags: CompiledFlags,
    pub results: Vec<ImportResult>,
    pub attempts: Vec<TierAttempt>,
}

struct Resolved {
    index: RollbackIndex,
    archive: LoadedArchive,
}

enum TierLookup {
    Hit(Box<Resolved>),
    Miss(String),
}

pub struct RollbackEngine {
    target: Arc<ExecutionBackend>,
    local: LocalStorage,
    cold: Option<ObjectStorage>,
    artifacts: ArtifactSource,
    tiers: Vec<Tier>,
    concurrency: usize,
}

impl RollbackEngine {
    pub fn new(
        target: ExecutionBackend,
        local: LocalStorage,
        cold: Option<ObjectStorage>,
        artifacts: ArtifactSource,
    ) -> Self {
        Self {
            target: Arc::new(target),
            local,
            cold,
            artifacts,
            tiers: TIER_ORDER.to_vec(),
            concurrency: 1,
        }
    }

    pub fn with_tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn from_config(
        config: &PromoteConfig,
        unit: &DeploymentUnit,
        provider: &dyn CredentialProvider,
    ) -> DeployResult<Self> {
        let target = ExecutionBackend::for_server(config, &unit.target, provider)?;
        let local = LocalStorage::new(&config.deployment.state_dir);
        let cold = match &config.object_store {
            Some(_) => Some(ObjectStorage::new(object_store_client(config, provider)?, local.clone())),
            None => None,
        };
        let artifacts = ArtifactSource::from_config(&config.ci.artifacts, provider)?;
        Ok(Self::new(target, local, cold, artifacts).with_concurrency(config.deployment.concurrency))
    }

    pub async fn rollback(&self, unit: &DeploymentUnit) -> DeployResult<RollbackResult> {
        unit.validate()?;
        let reference = unit.rollback_reference.clone().ok_or_else(|| {
            CoreError::InvalidUnit("rollback requires rollback_reference".into())
        })?;
        if unit.target != self.target.server() {
            return Err(DeployError::Mismatch(format!(
                "rollback for `{}` but the engine targets `{}`",
                unit.target,
                self.target.server()
            )));
        }
        info!(reference = %reference, target = %unit.target, "rollback started");

        let mut attempts = Vec::new();
        let (resolved, resolved_from) = match &reference {
            RollbackReference::LatestLocal => (self.latest_local(unit).await?, ResolvedFrom::LatestLocal),
            RollbackReference::Pipeline(pipeline_id) => {
                let mut found = None;
                for &tier in &self.tiers {
                    let lookup = match tier {
                        Tier::PipelineArtifacts => self.from_artifacts(pipeline_id, unit).await?,
                        Tier::ObjectStore => self.from_object_store(pipeline_id, unit).await?,
                        Tier::LocalArchive => self.from_local(pipeline_id, unit).await?,
                    };
                    match lookup {
                        TierLookup::Hit(resolved) => {
                            info!(tier = %tier, archive = %resolved.index.archive_key, "archive resolved");
                            attempts.push(TierAttempt {
                                tier,
                                outcome: TierOutcome::Hit,
                            });
                            found = Some((*resolved, ResolvedFrom::Tier(tier)));
                            break;
                        }
                        TierLookup::Miss(reason) => {
                            warn!(tier = %tier, reason = %reason, "tier miss");
                            attempts.push(TierAttempt {
                                tier,
                                outcome: TierOutcome::Miss(reason),
                            });
                        }
                    }
                }
                found.ok_or_else(|| DeployError::ArchiveNotFound {
                    reference: reference.to_string(),
                    misses: attempts
                        .iter()
                        .map(|a| match &a.outcome {
                            TierOutcome::Miss(reason) => format!("{}: {reason}", a.tier),
                            TierOutcome::Hit => a.tier.to_string(),
                        })
                        .collect(),
                })?
            }
        };

        let Resolved { index, archive } = resolved;
        // Failed imports are archived for audit only.
        if let ImportOutcome::Failed { message } = &archive.manifest.import_outcome {
            return Err(DeployError::NotRestorable {
                archive: index.archive_key.clone(),
                reason: message.clone(),
            });
        }
        if archive.flags != index.flags {
            return Err(DeployError::Integrity(format!(
                "archive {} holds flags {} but its index records {}",
                index.archive_key, archive.flags, index.flags
            )));
        }
        if archive.manifest.target != index.target {
            return Err(DeployError::Integrity(format!(
                "archive {} was applied to {} but its index records {}",
                index.archive_key, archive.manifest.target, index.target
            )));
        }

        info!(
            archive = %index.archive_key,
            target = %unit.target,
            flags = %archive.flags,
            bundles = archive.bundles.len(),
            "replaying archive"
        );
        let results = import_bundles(
            &self.target,
            archive.bundles,
            &archive.flags,
            archive.manifest.i18n,
            archive.manifest.refdata,
            self.concurrency,
        )
        .await?;

        info!(archive = %index.archive_key, imported = results.len(), "rollback finished");
        Ok(RollbackResult {
            reference,
            resolved_from,
            flags: archive.flags,
            index,
            results,
            attempts,
        })
    }

    async fn latest_local(&self, unit: &DeploymentUnit) -> DeployResult<Resolved> {
        let index = match read_index(&self.local, layout::LATEST_INDEX).await {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                return Err(DeployError::ArchiveNotFound {
                    reference: RollbackReference::LatestLocal.to_string(),
                    misses: vec![format!("no local index at {}", layout::LATEST_INDEX)],
                });
            }
            Err(e) => return Err(e.into()),
        };
        safety_check(&index, unit)?;
        let archive = load_archive(&self.local, &index.archive_key).await?;
        Ok(Resolved { index, archive })
    }

    async fn from_artifacts(&self, pipeline_id: &str, unit: &DeploymentUnit) -> DeployResult<TierLookup> {
        if !self.artifacts.is_enabled() {
            return Ok(TierLookup::Miss("no artifact source configured".into()));
        }
        let handle = match self.artifacts.open(pipeline_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return Ok(TierLookup::Miss(format!("pipeline {pipeline_id} has no artifacts"))),
            Err(e) if e.is_not_found() || e.is_retryable() => return Ok(TierLookup::Miss(e.to_string())),
            Err(e) => return Err(e.into()),
        };
        debug!(source = %handle.describe(), "reading pipeline artifacts");
        resolve(&handle, &layout::rollback_index(pipeline_id), unit, |_| Some(&handle)).await
    }

    async fn from_object_store(&self, pipeline_id: &str, unit: &DeploymentUnit) -> DeployResult<TierLookup> {
        let Some(cold) = &self.cold else {
            return Ok(TierLookup::Miss("object store not configured".into()));
        };
        let index = match miss_on_absent(read_index(&BucketReader(cold), &layout::rollback_index(pipeline_id)).await)? {
            Ok(index) => index,
            Err(reason) => return Ok(TierLookup::Miss(reason)),
        };
        safety_check(&index, unit)?;
        let Some(remote_url) = index.remote_url.clone() else {
            return Ok(TierLookup::Miss(format!(
                "index for {pipeline_id} records no remote archive url"
            )));
        };
        let remote = RemoteArchive::new(cold, &index.archive_key, &remote_url);
        match miss_on_absent(load_archive(&remote, &index.archive_key).await)? {
            Ok(archive) => Ok(TierLookup::Hit(Box::new(Resolved { index, archive }))),
            Err(reason) => Ok(TierLookup::Miss(reason)),
        }
    }

    async fn from_local(&self, pipeline_id: &str, unit: &DeploymentUnit) -> DeployResult<TierLookup> {
        resolve(&self.local, &layout::rollback_index(pipeline_id), unit, |index| {
            (index.storage == StorageKind::Local).then_some(&self.local)
        })
        .await
    }
}

/// Read an index and its archive through readers. `archive_reader` returns
/// `None` when the index rules this reader out.
async fn resolve<'r, I, A>(
    index_reader: &I,
    index_key: &str,
    unit: &DeploymentUnit,
    archive_reader: impl FnOnce(&RollbackIndex) -> Option<&'r A>,
) -> DeployResult<TierLookup>
where
    I: ObjectReader,
    A: ObjectReader + 'r,
{
    let index = match miss_on_absent(read_index(index_reader, index_key).await)? {
        Ok(index) => index,
        Err(reason) => return Ok(TierLookup::Miss(reason)),
    };
    safety_check(&index, unit)?;
    let Some(reader) = archive_reader(&index) else {
        return Ok(TierLookup::Miss(format!(
            "run {} used {} storage",
            index.pipeline_id, index.storage
        )));
    };
    match miss_on_absent(load_archive(reader, &index.archive_key).await)? {
        Ok(archive) => Ok(TierLookup::Hit(Box::new(Resolved { index, archive }))),
        Err(reason) => Ok(TierLookup::Miss(reason)),
    }
}

/// Absent and unreachable objects are a miss; anything else is fatal.
fn miss_on_absent<T>(result: ArchiveResult<T>) -> DeployResult<Result<T, String>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(e) if e.is_not_found() || e.is_retryable() => Ok(Err(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn safety_check(index: &RollbackIndex, unit: &DeploymentUnit) -> DeployResult<()> {
    if index.target != unit.target {
        return Err(DeployError::SafetyCheck {
            archived: index.target.clone(),
            requested: unit.target.clone(),
        });
    }
    Ok(())
}
