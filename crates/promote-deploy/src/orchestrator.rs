//! Deployment orchestrator: extract → import → archive.
//!
//! Phases hand off through storage only. `import` reads the bundle metadata
//! written by `extract`, and `archive` reads the import record written by
//! `import`, so each phase can run in a separate process (or CI job) and
//! `deploy` behaves exactly like running the three in sequence.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use promote_archive::{ArchiveManager, ArchiveReceipt, ArchiveRequest};
use promote_core::types::layout;
use promote_core::{
    Bundle, BundleMetadata, BundleRecord, CompiledFlags, CoreError, CredentialProvider,
    DeploymentKind, DeploymentUnit, EntityRef, I18nMode, ImportOutcome, ImportRecord,
    METADATA_VERSION, Profile, PromoteConfig, Provenance, RefdataMode,
};
use promote_exec::{ExecutionBackend, ImportResult};
use promote_storage::StorageBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::{DeployError, DeployResult, ErrorClass};
use crate::governance::{AllowAll, GovernanceValidator, RuleValidator, Verdict};
use crate::phase::{DeploymentRun, RunPhase};
use crate::pool::run_bounded;

#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub run: DeploymentRun,
    pub metadata: BundleMetadata,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub run: DeploymentRun,
    pub metadata: BundleMetadata,
    pub flags: CompiledFlags,
    pub results: Vec<ImportResult>,
}

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub run: DeploymentRun,
    pub receipt: ArchiveReceipt,
}

#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub run: DeploymentRun,
    pub metadata: BundleMetadata,
    pub flags: CompiledFlags,
    pub results: Vec<ImportResult>,
    pub receipt: ArchiveReceipt,
}

pub struct Orchestrator {
    profile: Profile,
    source: Arc<ExecutionBackend>,
    target: Arc<ExecutionBackend>,
    storage: StorageBackend,
    archives: ArchiveManager,
    validator: Arc<dyn GovernanceValidator>,
    provenance: Provenance,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        profile: Profile,
        source: ExecutionBackend,
        target: ExecutionBackend,
        storage: StorageBackend,
    ) -> Self {
        Self {
            profile,
            source: Arc::new(source),
            target: Arc::new(target),
            archives: ArchiveManager::new(storage.clone()),
            storage,
            validator: Arc::new(AllowAll),
            provenance: Provenance::local(format!("local-{}", Utc::now().format("%Y%m%d%H%M%S"))),
            concurrency: 1,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn GovernanceValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Wire everything a unit needs from `promote.toml`: its profile, both
    /// execution backends, storage, governance and CI provenance.
    pub fn from_config(
        config: &PromoteConfig,
        unit: &DeploymentUnit,
        provider: &dyn CredentialProvider,
    ) -> DeployResult<Self> {
        let profile = Profile::load(&config.deployment.profiles_dir, &unit.profile)?;
        let source = ExecutionBackend::for_server(config, &unit.source, provider)?;
        let target = ExecutionBackend::for_server(config, &unit.target, provider)?;
        let storage = StorageBackend::from_config(config, provider)?;
        let validator: Arc<dyn GovernanceValidator> = if config.governance.enabled {
            Arc::new(RuleValidator::from_config(config)?)
        } else {
            Arc::new(AllowAll)
        };
        Ok(Self::new(profile, source, target, storage)
            .with_validator(validator)
            .with_provenance(Provenance::collect(&config.ci, provider))
            .with_concurrency(config.deployment.concurrency))
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    pub async fn extract(&self, unit: &DeploymentUnit) -> DeployResult<ExtractReport> {
        let mut run = DeploymentRun::new(&self.provenance.pipeline_id);
        let result = self.extract_phase(&mut run, unit).await;
        let metadata = settle(&mut run, result)?;
        Ok(ExtractReport { run, metadata })
    }

    /// Import bundles extracted by an earlier `extract`. Never re-extracts.
    pub async fn import(&self, unit: &DeploymentUnit) -> DeployResult<ImportReport> {
        let mut run = DeploymentRun::resume(&self.provenance.pipeline_id, RunPhase::Extracted);
        let result = self.import_phase(&mut run, unit).await;
        let (metadata, flags, results) = settle(&mut run, result)?;
        Ok(ImportReport {
            run,
            metadata,
            flags,
            results,
        })
    }

    pub async fn archive(&self, unit: &DeploymentUnit) -> DeployResult<ArchiveReport> {
        let mut run = DeploymentRun::resume(&self.provenance.pipeline_id, RunPhase::Imported);
        let result = self.archive_phase(&mut run, unit).await;
        let receipt = settle(&mut run, result)?;
        Ok(ArchiveReport { run, receipt })
    }

    /// `extract`, `import` and `archive` in one run.
    pub async fn deploy(&self, unit: &DeploymentUnit) -> DeployResult<DeploymentReport> {
        let mut run = DeploymentRun::new(&self.provenance.pipeline_id);
        info!(
            run = %run.run_id,
            source = %unit.source,
            target = %unit.target,
            profile = %unit.profile,
            version = %unit.version,
            "deployment started"
        );

        let result = self.extract_phase(&mut run, unit).await;
        settle(&mut run, result)?;
        let result = self.import_phase(&mut run, unit).await;
        let (metadata, flags, results) = settle(&mut run, result)?;
        let result = self.archive_phase(&mut run, unit).await;
        let receipt = settle(&mut run, result)?;

        info!(run = %run.run_id, archive = %receipt.archive_key, "deployment finished");
        Ok(DeploymentReport {
            run,
            metadata,
            flags,
            results,
            receipt,
        })
    }

    /// Entities the extract phase will request, in order.
    pub fn extraction_set(&self, unit: &DeploymentUnit) -> DeployResult<Vec<EntityRef>> {
        let entities: Vec<EntityRef> = match self.profile.kind {
            DeploymentKind::Baseline => self
                .profile
                .entities
                .iter()
                .map(|t| EntityRef::whole_type(t.id))
                .collect(),
            DeploymentKind::Functional => {
                if unit.entities.is_empty() {
                    return Err(CoreError::InvalidUnit(
                        "functional deployment lists no entities".into(),
                    )
                    .into());
                }
                unit.entities.clone()
            }
        };

        let mut names = HashSet::new();
        for entity in &entities {
            if !names.insert(Bundle::file_name_for(entity)) {
                return Err(CoreError::InvalidUnit(format!(
                    "entity {entity} maps to the same bundle file as another entity"
                ))
                .into());
            }
        }
        Ok(entities)
    }

    fn check_unit(&self, unit: &DeploymentUnit) -> DeployResult<()> {
        unit.validate()?;
        if unit.profile != self.profile.name {
            return Err(DeployError::Mismatch(format!(
                "unit uses profile `{}` but `{}` is loaded",
                unit.profile, self.profile.name
            )));
        }
        Ok(())
    }

    async fn extract_phase(&self, run: &mut DeploymentRun, unit: &DeploymentUnit) -> DeployResult<BundleMetadata> {
        self.check_unit(unit)?;
        if let Verdict::Fail(errors) = self.validator.validate(unit, self.provenance.branch.as_deref()) {
            return Err(DeployError::Validation(errors));
        }
        let entities = self.extraction_set(unit)?;
        // Import needs these flags; an unusable profile must stop the run here.
        self.profile.compile()?;
        run.advance(RunPhase::Extracting)?;

        let kind = self.profile.kind;
        // The previous import record describes the metadata about to be replaced.
        self.storage.delete(&layout::import_record(kind)).await?;
        info!(
            run = %run.run_id,
            source = %unit.source,
            kind = %kind,
            entities = entities.len(),
            "extracting"
        );
        let bundles = run_bounded(entities, self.concurrency, |entity| {
            let source = Arc::clone(&self.source);
            async move { source.extract(&entity).await.map_err(DeployError::from) }
        })
        .await?;

        let mut records = Vec::with_capacity(bundles.len());
        for bundle in &bundles {
            let key = layout::bundle(kind, &bundle.file_name);
            self.storage.put(&key, &bundle.payload).await?;
            records.push(BundleRecord::for_bundle(bundle, key));
        }

        let metadata = BundleMetadata {
            metadata_version: METADATA_VERSION,
            kind,
            profile: self.profile.name.clone(),
            unit: unit.clone(),
            i18n: self.profile.i18n_mode(),
            refdata: self.profile.refdata_mode(),
            extracted_at: Utc::now(),
            bundles: records,
        };
        let metadata_key = layout::metadata(kind);
        self.storage.put(&metadata_key, &encode(&metadata_key, &metadata)?).await?;
        run.advance(RunPhase::Extracted)?;
        Ok(metadata)
    }

    async fn import_phase(
        &self,
        run: &mut DeploymentRun,
        unit: &DeploymentUnit,
    ) -> DeployResult<(BundleMetadata, CompiledFlags, Vec<ImportResult>)> {
        self.check_unit(unit)?;
        let metadata = self.load_metadata().await?;
        check_metadata(&metadata, unit)?;
        run.advance(RunPhase::Importing)?;

        let flags = self.profile.compile()?;
        let bundles = self.load_bundles(&metadata).await?;
        info!(
            run = %run.run_id,
            target = %unit.target,
            flags = %flags,
            bundles = bundles.len(),
            "importing"
        );

        let imported = import_bundles(
            &self.target,
            bundles,
            &flags,
            metadata.i18n,
            metadata.refdata,
            self.concurrency,
        )
        .await;

        let outcome = match &imported {
            Ok(_) => ImportOutcome::Succeeded,
            Err(e) => ImportOutcome::Failed { message: e.to_string() },
        };
        let record = ImportRecord {
            metadata_extracted_at: metadata.extracted_at,
            flags: flags.clone(),
            outcome: outcome.clone(),
            imported: match &imported {
                Ok(results) => results.iter().map(|r| r.entity.clone()).collect(),
                Err(_) => Vec::new(),
            },
            finished_at: Utc::now(),
        };
        let record_key = layout::import_record(metadata.kind);
        let stored = match encode(&record_key, &record) {
            Ok(bytes) => self.storage.put(&record_key, &bytes).await.map_err(DeployError::from),
            Err(e) => Err(e),
        };

        match imported {
            Ok(results) => {
                stored?;
                run.advance(RunPhase::Imported)?;
                Ok((metadata, flags, results))
            }
            Err(err) => {
                if let Err(e) = stored {
                    warn!(error = %e, "failed to record import outcome");
                }
                if err.class() == ErrorClass::ExternalTool {
                    self.archive_failed_import(&metadata, &flags, &outcome).await;
                }
                Err(err)
            }
        }
    }

    /// Keep an audit archive of a failed import. Errors are logged, not returned.
    async fn archive_failed_import(&self, metadata: &BundleMetadata, flags: &CompiledFlags, outcome: &ImportOutcome) {
        let request = ArchiveRequest {
            metadata,
            flags,
            outcome,
            provenance: &self.provenance,
        };
        match self.archives.create_archive(request).await {
            Ok(receipt) => warn!(archive = %receipt.archive_key, "import failed; archive recorded for audit"),
            Err(e) => warn!(error = %e, "import failed and the audit archive could not be written"),
        }
    }

    async fn archive_phase(&self, run: &mut DeploymentRun, unit: &DeploymentUnit) -> DeployResult<ArchiveReceipt> {
        self.check_unit(unit)?;
        let metadata = self.load_metadata().await?;
        check_metadata(&metadata, unit)?;

        let record_key = layout::import_record(metadata.kind);
        let record: ImportRecord = match self.storage.get(&record_key).await {
            Ok(bytes) => decode(&record_key, &bytes)?,
            Err(e) if e.is_not_found() => return Err(DeployError::ImportNotFound(record_key)),
            Err(e) => return Err(e.into()),
        };
        if record.metadata_extracted_at != metadata.extracted_at {
            return Err(DeployError::Mismatch(format!(
                "import record belongs to metadata extracted at {}, current metadata was extracted at {}",
                record.metadata_extracted_at, metadata.extracted_at
            )));
        }
        if let ImportOutcome::Failed { message } = &record.outcome {
            return Err(DeployError::Mismatch(format!(
                "last import did not succeed ({message}); nothing to archive"
            )));
        }
        run.advance(RunPhase::Archiving)?;

        let receipt = self
            .archives
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &record.flags,
                outcome: &record.outcome,
                provenance: &self.provenance,
            })
            .await?;
        run.advance(RunPhase::Archived)?;
        Ok(receipt)
    }

    async fn load_metadata(&self) -> DeployResult<BundleMetadata> {
        let key = layout::metadata(self.profile.kind);
        match self.storage.get(&key).await {
            Ok(bytes) => decode(&key, &bytes),
            Err(e) if e.is_not_found() => Err(DeployError::MetadataNotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_bundles(&self, metadata: &BundleMetadata) -> DeployResult<Vec<Bundle>> {
        let mut bundles = Vec::with_capacity(metadata.bundles.len());
        for record in &metadata.bundles {
            let bundle = Bundle::from_record(record, self.storage.get(&record.key).await?);
            if !bundle.verify(&record.sha256) {
                return Err(DeployError::Integrity(format!(
                    "bundle {} changed since extraction",
                    record.key
                )));
            }
            bundles.push(bundle);
        }
        Ok(bundles)
    }
}

/// Import every bundle with one flags string through the bounded pool.
pub(crate) async fn import_bundles(
    target: &Arc<ExecutionBackend>,
    bundles: Vec<Bundle>,
    flags: &CompiledFlags,
    i18n: I18nMode,
    refdata: RefdataMode,
    concurrency: usize,
) -> DeployResult<Vec<ImportResult>> {
    run_bounded(bundles, concurrency, |bundle| {
        let target = Arc::clone(target);
        let flags = flags.clone();
        async move {
            target
                .import(&bundle, &flags, i18n, refdata)
                .await
                .map_err(DeployError::from)
        }
    })
    .await
}

fn check_metadata(metadata: &BundleMetadata, unit: &DeploymentUnit) -> DeployResult<()> {
    let extracted = &metadata.unit;
    if extracted.source != unit.source || extracted.target != unit.target || extracted.profile != unit.profile {
        return Err(DeployError::Mismatch(format!(
            "stored metadata was extracted for {} -> {} ({}), not {} -> {} ({})",
            extracted.source, extracted.target, extracted.profile, unit.source, unit.target, unit.profile
        )));
    }
    Ok(())
}

fn settle<T>(run: &mut DeploymentRun, result: DeployResult<T>) -> DeployResult<T> {
    if let Err(e) = &result {
        run.fail(e);
    }
    result
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> DeployResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| DeployError::Record {
        key: key.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> DeployResult<T> {
    serde_json::from_slice(bytes).map_err(|e| DeployError::Record {
        key: key.to_string(),
        message: e.to_string(),
    })
}
