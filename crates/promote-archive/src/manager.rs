//! Archive creation and loading.
//!
//! An archive is a set of objects under `archives/<key>/`. The rollback
//! index is the commit point: it is written only after every archive object
//! has been stored, so an interrupted archive is never reachable from an
//! index. Archives of failed imports get a per-pipeline index but never
//! replace `rollback/latest.json`. When `latest.json` cannot be written the
//! per-pipeline index is removed again, so a failed commit leaves neither.

use chrono::{DateTime, Utc};
use promote_core::types::layout;
use promote_core::{
    ArchiveLocation, ArchiveManifest, ArchivedBundle, Bundle, BundleMetadata, CompiledFlags,
    DeploymentUnit, EvidencePackage, INDEX_VERSION, ImportOutcome, MANIFEST_VERSION, Provenance,
    RollbackIndex, StorageKind,
};
use promote_storage::{Location, StorageBackend};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::reader::ObjectReader;

/// Everything needed to archive one run.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRequest<'a> {
    pub metadata: &'a BundleMetadata,
    pub flags: &'a CompiledFlags,
    pub outcome: &'a ImportOutcome,
    pub provenance: &'a Provenance,
}

#[derive(Debug, Clone)]
pub struct ArchiveReceipt {
    pub archive_key: String,
    pub manifest: ArchiveManifest,
    /// Store key of the evidence package.
    pub evidence_key: String,
    pub index: RollbackIndex,
    pub index_location: Location,
}

/// An archive read back from some source, digests verified.
#[derive(Debug, Clone)]
pub struct LoadedArchive {
    pub manifest: ArchiveManifest,
    pub unit: DeploymentUnit,
    pub flags: CompiledFlags,
    pub bundles: Vec<Bundle>,
}

#[derive(Debug, Clone)]
pub struct ArchiveManager {
    storage: StorageBackend,
}

impl ArchiveManager {
    pub fn new(storage: StorageBackend) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// `<change_request>-v<version>-<YYYYMMDD-HHMMSS>`.
    pub fn archive_key(unit: &DeploymentUnit, at: DateTime<Utc>) -> String {
        format!(
            "{}-v{}-{}",
            unit.change_request_label(),
            unit.version,
            at.format("%Y%m%d-%H%M%S")
        )
    }

    pub async fn create_archive(&self, request: ArchiveRequest<'_>) -> ArchiveResult<ArchiveReceipt> {
        let metadata = request.metadata;
        let unit = &metadata.unit;
        let archived_at = Utc::now();
        let archive_key = Self::archive_key(unit, archived_at);
        info!(
            archive = %archive_key,
            bundles = metadata.bundles.len(),
            storage = %self.storage.kind(),
            "creating archive"
        );

        let mut archived = Vec::with_capacity(metadata.bundles.len());
        for record in &metadata.bundles {
            let payload = self.storage.get(&record.key).await?;
            let bundle = Bundle::from_record(record, payload);
            if !bundle.verify(&record.sha256) {
                return Err(ArchiveError::Integrity(format!(
                    "bundle {} does not match its recorded digest",
                    record.key
                )));
            }
            self.storage
                .put(&layout::archive_bundle(&archive_key, &record.file_name), &bundle.payload)
                .await?;
            archived.push(ArchivedBundle {
                entity: record.entity.clone(),
                file_name: record.file_name.clone(),
                sha256: record.sha256.clone(),
            });
            debug!(archive = %archive_key, bundle = %record.file_name, "bundle archived");
        }

        self.storage
            .put(&layout::archive_object(&archive_key, layout::UNIT_FILE), &to_json(unit)?)
            .await?;
        self.storage
            .put(
                &layout::archive_object(&archive_key, layout::FLAGS_FILE),
                format!("{}\n", request.flags).as_bytes(),
            )
            .await?;

        let manifest = ArchiveManifest {
            manifest_version: MANIFEST_VERSION,
            archive_key: archive_key.clone(),
            version: unit.version.clone(),
            change_request: unit.change_request_label().to_string(),
            archived_at,
            kind: metadata.kind,
            profile: metadata.profile.clone(),
            source: unit.source.clone(),
            target: unit.target.clone(),
            flags: request.flags.clone(),
            i18n: metadata.i18n,
            refdata: metadata.refdata,
            import_outcome: request.outcome.clone(),
            bundles: archived,
            provenance: request.provenance.clone(),
        };
        let manifest_location = self
            .storage
            .put(&layout::archive_object(&archive_key, layout::MANIFEST_FILE), &to_json(&manifest)?)
            .await?;

        let evidence = EvidencePackage::new(unit.clone(), manifest.clone());
        let evidence_key = layout::archive_object(&archive_key, &evidence.file_name());
        self.storage.put(&evidence_key, &to_json(&evidence)?).await?;

        let index = self.build_index(&manifest, &manifest_location)?;
        let index_bytes = to_json(&index)?;
        let index_key = layout::rollback_index(&index.pipeline_id);
        let index_location = self.storage.put(&index_key, &index_bytes).await?;
        if request.outcome == &ImportOutcome::Succeeded {
            if let Err(e) = self.storage.put(layout::LATEST_INDEX, &index_bytes).await {
                if let Err(cleanup) = self.storage.delete(&index_key).await {
                    warn!(index = %index_key, error = %cleanup, "could not withdraw rollback index");
                }
                return Err(e.into());
            }
        }

        info!(
            archive = %archive_key,
            pipeline = %index.pipeline_id,
            index = %index_location.uri(),
            "archive committed"
        );
        Ok(ArchiveReceipt {
            archive_key,
            manifest,
            evidence_key,
            index,
            index_location,
        })
    }

    fn build_index(&self, manifest: &ArchiveManifest, manifest_location: &Location) -> ArchiveResult<RollbackIndex> {
        let prefix = layout::archive_prefix(&manifest.archive_key);
        let local_dir = self.storage.local().path_for(prefix.trim_end_matches('/'))?;

        let mut locations = vec![ArchiveLocation {
            storage: StorageKind::Local,
            uri: local_dir.display().to_string(),
        }];
        let remote_url = manifest_location.remote_url.as_ref().map(|url| {
            let base = url.trim_end_matches(layout::MANIFEST_FILE).to_string();
            locations.push(ArchiveLocation {
                storage: StorageKind::ObjectStore,
                uri: base.clone(),
            });
            base
        });

        Ok(RollbackIndex {
            index_version: INDEX_VERSION,
            pipeline_id: manifest.provenance.pipeline_id.clone(),
            archive_key: manifest.archive_key.clone(),
            storage: self.storage.kind(),
            locations,
            remote_url,
            target: manifest.target.clone(),
            flags: manifest.flags.clone(),
            profile: manifest.profile.clone(),
            kind: manifest.kind,
            change_request: manifest.change_request.clone(),
            version: manifest.version.clone(),
            created_at: manifest.archived_at,
        })
    }
}

/// Read and decode a rollback index.
pub async fn read_index<R: ObjectReader>(reader: &R, key: &str) -> ArchiveResult<RollbackIndex> {
    from_json(key, &reader.read(key).await?)
}

/// Read a complete archive and verify it against its manifest.
pub async fn load_archive<R: ObjectReader>(reader: &R, archive_key: &str) -> ArchiveResult<LoadedArchive> {
    debug!(archive = %archive_key, source = %reader.describe(), "loading archive");

    let manifest_key = layout::archive_object(archive_key, layout::MANIFEST_FILE);
    let manifest: ArchiveManifest = from_json(&manifest_key, &reader.read(&manifest_key).await?)?;
    if manifest.archive_key != archive_key {
        return Err(ArchiveError::Integrity(format!(
            "manifest names archive {} but was read from {archive_key}",
            manifest.archive_key
        )));
    }

    let unit_key = layout::archive_object(archive_key, layout::UNIT_FILE);
    let unit: DeploymentUnit = from_json(&unit_key, &reader.read(&unit_key).await?)?;

    let flags_key = layout::archive_object(archive_key, layout::FLAGS_FILE);
    let raw_flags = reader.read(&flags_key).await?;
    let flags = CompiledFlags::parse(&String::from_utf8_lossy(&raw_flags)).map_err(|e| {
        ArchiveError::Deserialize {
            key: flags_key.clone(),
            message: e.to_string(),
        }
    })?;
    if flags != manifest.flags {
        return Err(ArchiveError::Integrity(format!(
            "{flags_key} holds {flags} but the manifest records {}",
            manifest.flags
        )));
    }

    let mut bundles = Vec::with_capacity(manifest.bundles.len());
    for entry in &manifest.bundles {
        let key = layout::archive_bundle(archive_key, &entry.file_name);
        let payload = reader.read(&key).await?;
        let bundle = Bundle {
            entity: entry.entity.clone(),
            file_name: entry.file_name.clone(),
            sha256: promote_core::sha256_hex(&payload),
            payload,
            extracted_at: manifest.archived_at,
            source: manifest.source.clone(),
        };
        if !bundle.verify(&entry.sha256) {
            return Err(ArchiveError::Integrity(format!("{key} does not match the manifest digest")));
        }
        bundles.push(bundle);
    }

    Ok(LoadedArchive {
        manifest,
        unit,
        flags,
        bundles,
    })
}

fn to_json<T: Serialize>(value: &T) -> ArchiveResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| ArchiveError::Serialize(e.to_string()))
}

fn from_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> ArchiveResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ArchiveError::Deserialize {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use promote_core::{BundleRecord, DeploymentKind, EntityRef, I18nMode, RefdataMode};
    use promote_storage::LocalStorage;

    fn unit() -> DeploymentUnit {
        DeploymentUnit {
            version: "1.4.0".into(),
            change_request: Some("CR-77".into()),
            source: "dev-ppm".into(),
            target: "test-ppm".into(),
            profile: "functional".into(),
            entities: vec![EntityRef::new(9, "WF_A"), EntityRef::new(26, "OT_B")],
            rollback_reference: None,
            description: None,
            created_by: None,
        }
    }

    async fn extracted(storage: &StorageBackend) -> BundleMetadata {
        let mut records = Vec::new();
        for entity in unit().entities {
            let bundle = Bundle::new(entity.clone(), format!("<{entity}/>").into_bytes(), "dev-ppm");
            let key = layout::bundle(DeploymentKind::Functional, &bundle.file_name);
            storage.put(&key, &bundle.payload).await.unwrap();
            records.push(BundleRecord::for_bundle(&bundle, key));
        }
        BundleMetadata {
            metadata_version: 1,
            kind: DeploymentKind::Functional,
            profile: "functional".into(),
            unit: unit(),
            i18n: I18nMode::LenientCharset,
            refdata: RefdataMode::NoChange,
            extracted_at: Utc::now(),
            bundles: records,
        }
    }

    fn flags() -> CompiledFlags {
        CompiledFlags::parse("NNNNYNNNNNNNNNNNNNNNNNNNN").unwrap()
    }

    #[tokio::test]
    async fn create_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        let manager = ArchiveManager::new(storage.clone());

        let receipt = manager
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("4821"),
            })
            .await
            .unwrap();

        assert!(receipt.archive_key.starts_with("CR-77-v1.4.0-"));
        assert_eq!(receipt.index.pipeline_id, "4821");
        assert_eq!(receipt.index.target, "test-ppm");
        assert_eq!(receipt.index.flags, flags());
        assert_eq!(receipt.index.storage, StorageKind::Local);
        assert!(receipt.index.remote_url.is_none());

        let index = read_index(&storage, "rollback/4821.json").await.unwrap();
        assert_eq!(index, receipt.index);
        let latest = read_index(&storage, layout::LATEST_INDEX).await.unwrap();
        assert_eq!(latest, receipt.index);

        let loaded = load_archive(&storage, &index.archive_key).await.unwrap();
        assert_eq!(loaded.flags, flags());
        assert_eq!(loaded.unit, unit());
        assert_eq!(loaded.bundles.len(), 2);
        assert_eq!(loaded.bundles[0].payload, b"<9/WF_A/>");
    }

    #[tokio::test]
    async fn interrupted_archive_leaves_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        // Second bundle vanishes before archiving reaches it.
        std::fs::remove_file(storage.local().path_for(&metadata.bundles[1].key).unwrap()).unwrap();

        let err = ArchiveManager::new(storage.clone())
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("4822"),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(read_index(&storage, "rollback/4822.json").await.unwrap_err().is_not_found());
        assert!(read_index(&storage, layout::LATEST_INDEX).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn evidence_package_names_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        let provenance = Provenance {
            pipeline_id: "4821".into(),
            commit_sha: Some("9f1c2e7".into()),
            triggered_by: Some("release-bot".into()),
            ..Provenance::local("4821")
        };
        let receipt = ArchiveManager::new(storage.clone())
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &provenance,
            })
            .await
            .unwrap();

        assert!(receipt.evidence_key.starts_with(&format!("archives/{}/CR-77-test-ppm-", receipt.archive_key)));
        assert!(receipt.evidence_key.ends_with("-evidence.json"));
        let evidence: EvidencePackage =
            serde_json::from_slice(&storage.get(&receipt.evidence_key).await.unwrap()).unwrap();
        assert_eq!(evidence.deployment.pipeline_id, "4821");
        assert_eq!(evidence.deployment.commit_sha, "9f1c2e7");
        assert_eq!(evidence.deployment.deployed_by, "release-bot");
        assert_eq!(evidence.deployment.archive_key, receipt.archive_key);
        assert_eq!(evidence.manifest, receipt.manifest);
        assert_eq!(evidence.unit, unit());
    }

    #[tokio::test]
    async fn failed_latest_write_withdraws_pipeline_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        // A directory squatting on latest.json makes the final rename fail.
        let latest = storage.local().path_for(layout::LATEST_INDEX).unwrap();
        std::fs::create_dir_all(latest.join("occupied")).unwrap();

        let err = ArchiveManager::new(storage.clone())
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("4823"),
            })
            .await
            .unwrap_err();
        assert!(!err.is_not_found());

        assert!(read_index(&storage, "rollback/4823.json").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn failed_import_does_not_move_latest() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        let manager = ArchiveManager::new(storage.clone());

        manager
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("100"),
            })
            .await
            .unwrap();
        let failed = manager
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Failed {
                    message: "import rejected".into(),
                },
                provenance: &Provenance::local("101"),
            })
            .await
            .unwrap();

        assert_eq!(read_index(&storage, "rollback/101.json").await.unwrap(), failed.index);
        let latest = read_index(&storage, layout::LATEST_INDEX).await.unwrap();
        assert_eq!(latest.pipeline_id, "100");
        let loaded = load_archive(&storage, &failed.archive_key).await.unwrap();
        assert!(matches!(loaded.manifest.import_outcome, ImportOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn tampered_bundle_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        let receipt = ArchiveManager::new(storage.clone())
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("9"),
            })
            .await
            .unwrap();

        let key = layout::archive_bundle(&receipt.archive_key, &metadata.bundles[0].file_name);
        storage.put(&key, b"tampered").await.unwrap();
        let err = load_archive(&storage, &receipt.archive_key).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Integrity(_)));
    }

    #[tokio::test]
    async fn mismatched_flags_file_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()));
        let metadata = extracted(&storage).await;
        let receipt = ArchiveManager::new(storage.clone())
            .create_archive(ArchiveRequest {
                metadata: &metadata,
                flags: &flags(),
                outcome: &ImportOutcome::Succeeded,
                provenance: &Provenance::local("10"),
            })
            .await
            .unwrap();

        let key = layout::archive_object(&receipt.archive_key, layout::FLAGS_FILE);
        storage.put(&key, "Y".repeat(25).as_bytes()).await.unwrap();
        let err = load_archive(&storage, &receipt.archive_key).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Integrity(_)));
    }

    #[test]
    fn archive_key_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z").unwrap().with_timezone(&Utc);
        assert_eq!(ArchiveManager::archive_key(&unit(), at), "CR-77-v1.4.0-20260304-050607");
    }
}
