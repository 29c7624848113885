//! Records exchanged between phases and persisted through storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::flags::CompiledFlags;
use crate::profile::{DeploymentKind, I18nMode, RefdataMode};
use crate::provenance::Provenance;
use crate::unit::{DeploymentUnit, EntityRef};

pub const METADATA_VERSION: u32 = 1;
pub const MANIFEST_VERSION: u32 = 1;
pub const INDEX_VERSION: u32 = 1;
pub const EVIDENCE_VERSION: u32 = 1;

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// One extracted entity.
#[derive(Clone, PartialEq, Eq)]
pub struct Bundle {
    pub entity: EntityRef,
    pub file_name: String,
    pub payload: Vec<u8>,
    pub sha256: String,
    pub extracted_at: DateTime<Utc>,
    pub source: String,
}

impl Bundle {
    pub fn new(entity: EntityRef, payload: Vec<u8>, source: impl Into<String>) -> Self {
        Self {
            file_name: Self::file_name_for(&entity),
            sha256: sha256_hex(&payload),
            entity,
            payload,
            extracted_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Rebuild a bundle from stored bytes and its record.
    pub fn from_record(record: &BundleRecord, payload: Vec<u8>) -> Self {
        Self {
            entity: record.entity.clone(),
            file_name: record.file_name.clone(),
            sha256: sha256_hex(&payload),
            payload,
            extracted_at: record.extracted_at,
            source: record.source.clone(),
        }
    }

    /// Stable file name for an entity's bundle.
    pub fn file_name_for(entity: &EntityRef) -> String {
        let code: String = entity
            .reference_code
            .as_deref()
            .unwrap_or("all")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        format!("extract-{}-{}.xml", entity.entity_id, code)
    }

    pub fn verify(&self, expected_sha256: &str) -> bool {
        self.sha256 == expected_sha256
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("entity", &self.entity)
            .field("file_name", &self.file_name)
            .field("bytes", &self.payload.len())
            .field("sha256", &self.sha256)
            .field("extracted_at", &self.extracted_at)
            .field("source", &self.source)
            .finish()
    }
}

/// Where a bundle was stored during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub entity: EntityRef,
    pub file_name: String,
    pub key: String,
    pub sha256: String,
    pub extracted_at: DateTime<Utc>,
    pub source: String,
}

impl BundleRecord {
    pub fn for_bundle(bundle: &Bundle, key: impl Into<String>) -> Self {
        Self {
            entity: bundle.entity.clone(),
            file_name: bundle.file_name.clone(),
            key: key.into(),
            sha256: bundle.sha256.clone(),
            extracted_at: bundle.extracted_at,
            source: bundle.source.clone(),
        }
    }
}

/// Hand-off record between the extract and import phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub metadata_version: u32,
    pub kind: DeploymentKind,
    pub profile: String,
    pub unit: DeploymentUnit,
    pub i18n: I18nMode,
    pub refdata: RefdataMode,
    pub extracted_at: DateTime<Utc>,
    pub bundles: Vec<BundleRecord>,
}

/// Result of the import phase, recorded in the archive manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    Succeeded,
    Failed { message: String },
}

/// What the import phase did, written once it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// `extracted_at` of the metadata this import consumed. An archive is
    /// only built from the metadata the record names.
    pub metadata_extracted_at: DateTime<Utc>,
    pub flags: CompiledFlags,
    pub outcome: ImportOutcome,
    pub imported: Vec<EntityRef>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    ObjectStore,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Local => f.write_str("local"),
            StorageKind::ObjectStore => f.write_str("object_store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedBundle {
    pub entity: EntityRef,
    pub file_name: String,
    pub sha256: String,
}

/// Manifest written inside every archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub manifest_version: u32,
    pub archive_key: String,
    pub version: String,
    pub change_request: String,
    pub archived_at: DateTime<Utc>,
    pub kind: DeploymentKind,
    pub profile: String,
    pub source: String,
    pub target: String,
    pub flags: CompiledFlags,
    pub i18n: I18nMode,
    pub refdata: RefdataMode,
    pub import_outcome: ImportOutcome,
    pub bundles: Vec<ArchivedBundle>,
    pub provenance: Provenance,
}

/// Who deployed what, from which commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvidence {
    pub archive_key: String,
    pub deployed_at: DateTime<Utc>,
    pub pipeline_id: String,
    pub commit_sha: String,
    pub deployed_by: String,
}

/// Audit package stored with every archive: the unit as deployed, the
/// archive manifest and the deployment's CI provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub evidence_version: u32,
    pub unit: DeploymentUnit,
    pub manifest: ArchiveManifest,
    pub deployment: DeploymentEvidence,
}

impl EvidencePackage {
    pub fn new(unit: DeploymentUnit, manifest: ArchiveManifest) -> Self {
        let provenance = &manifest.provenance;
        let deployment = DeploymentEvidence {
            archive_key: manifest.archive_key.clone(),
            deployed_at: manifest.archived_at,
            pipeline_id: provenance.pipeline_id.clone(),
            commit_sha: provenance.commit_sha.clone().unwrap_or_else(|| "local".into()),
            deployed_by: provenance.triggered_by.clone().unwrap_or_else(|| "unknown".into()),
        };
        Self {
            evidence_version: EVIDENCE_VERSION,
            unit,
            manifest,
            deployment,
        }
    }

    /// `<change_request>-<target>-<YYYYMMDD-HHMMSS>-evidence.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-evidence.json",
            self.manifest.change_request,
            self.manifest.target,
            self.manifest.archived_at.format("%Y%m%d-%H%M%S")
        )
    }
}

/// A place an archive can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub storage: StorageKind,
    pub uri: String,
}

/// Pointer from a pipeline id to the archive of that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackIndex {
    pub index_version: u32,
    pub pipeline_id: String,
    pub archive_key: String,
    pub storage: StorageKind,
    pub locations: Vec<ArchiveLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub target: String,
    pub flags: CompiledFlags,
    pub profile: String,
    pub kind: DeploymentKind,
    pub change_request: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

/// Storage keys shared by every phase.
pub mod layout {
    use crate::profile::DeploymentKind;

    /// Most recent rollback index written from this workstation or runner.
    pub const LATEST_INDEX: &str = "rollback/latest.json";

    pub const MANIFEST_FILE: &str = "manifest.json";
    pub const UNIT_FILE: &str = "bom.json";
    pub const FLAGS_FILE: &str = "flags.txt";

    pub fn metadata(kind: DeploymentKind) -> String {
        format!("metadata/{kind}-metadata.json")
    }

    pub fn import_record(kind: DeploymentKind) -> String {
        format!("metadata/{kind}-import.json")
    }

    pub fn bundle(kind: DeploymentKind, file_name: &str) -> String {
        format!("bundles/{kind}/{file_name}")
    }

    pub fn archive_prefix(archive_key: &str) -> String {
        format!("archives/{archive_key}/")
    }

    pub fn archive_object(archive_key: &str, name: &str) -> String {
        format!("archives/{archive_key}/{name}")
    }

    pub fn archive_bundle(archive_key: &str, file_name: &str) -> String {
        format!("archives/{archive_key}/bundles/{file_name}")
    }

    pub fn rollback_index(pipeline_id: &str) -> String {
        format!("rollback/{pipeline_id}.json")
    }
}
