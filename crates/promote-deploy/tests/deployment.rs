//! End-to-end deployment runs against the stand-in migration utility.

mod common;

use common::{Harness, WORKFLOW_ONLY, unit};
use promote_archive::read_index;
use promote_core::types::layout;
use promote_core::{
    ArchiveManifest, Capability, DeploymentKind, EntityRef, ImportOutcome, StorageKind,
};
use promote_deploy::{DeployError, ErrorClass, RunPhase};
use promote_storage::LocalStorage;

#[tokio::test]
async fn deploy_runs_all_phases() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A"), EntityRef::new(9, "WF_B")]);

    let report = h.orchestrator(&u, "4821").deploy(&u).await.unwrap();

    assert_eq!(
        report.run.phase_names(),
        vec!["pending", "extracting", "extracted", "importing", "imported", "archiving", "archived"]
    );
    assert_eq!(report.flags.as_str(), WORKFLOW_ONLY);
    assert_eq!(report.results.len(), 2);
    assert_eq!(h.extract_calls().len(), 2);
    assert_eq!(
        h.import_calls(),
        vec![
            format!(r#"import {WORKFLOW_ONLY} charset nochange extract-9-WF_A.xml <bundle entity="9" ref="WF_A"/>"#),
            format!(r#"import {WORKFLOW_ONLY} charset nochange extract-9-WF_B.xml <bundle entity="9" ref="WF_B"/>"#),
        ]
    );

    let store = LocalStorage::new(h.state());
    let index = read_index(&store, "rollback/4821.json").await.unwrap();
    assert_eq!(index, report.receipt.index);
    assert_eq!(index.target, "test-ppm");
    assert_eq!(index.flags.as_str(), WORKFLOW_ONLY);
    assert!(index.archive_key.starts_with("CR-2048-v2.1.0-"));
    assert_eq!(read_index(&store, layout::LATEST_INDEX).await.unwrap(), index);

    let manifest: ArchiveManifest = serde_json::from_slice(
        &store
            .get(&layout::archive_object(&index.archive_key, layout::MANIFEST_FILE))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.provenance.pipeline_id, "4821");
    assert_eq!(manifest.provenance.commit_sha.as_deref(), Some("0123abcd"));
    assert_eq!(manifest.import_outcome, ImportOutcome::Succeeded);
    assert_eq!(manifest.bundles.len(), 2);
    assert!(store.exists(&report.receipt.evidence_key).await.unwrap());
}

#[tokio::test]
async fn import_after_restart_does_not_extract_again() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A"), EntityRef::new(26, "RPT_1")]);

    let extracted = h.orchestrator(&u, "500").extract(&u).await.unwrap();
    assert_eq!(extracted.run.phase, RunPhase::Extracted);
    assert_eq!(h.extract_calls().len(), 2);

    // A fresh process picks up from the persisted metadata.
    let imported = h.orchestrator(&u, "500").import(&u).await.unwrap();
    assert_eq!(imported.run.phase_names(), vec!["extracted", "importing", "imported"]);
    assert_eq!(imported.metadata, extracted.metadata);
    assert_eq!(h.extract_calls().len(), 2);
    assert_eq!(h.import_calls().len(), 2);

    let archived = h.orchestrator(&u, "500").archive(&u).await.unwrap();
    assert_eq!(archived.run.phase, RunPhase::Archived);
    assert_eq!(archived.receipt.manifest.flags.as_str(), WORKFLOW_ONLY);
    assert_eq!(h.extract_calls().len(), 2);
    assert_eq!(h.import_calls().len(), 2);
}

#[tokio::test]
async fn baseline_extracts_every_entity_type() {
    let h = Harness::new(StorageKind::Local);
    h.write_profile(
        "baseline",
        DeploymentKind::Baseline,
        &[Capability::ReplaceObjectType, Capability::ReplaceWorkflow],
        &[(9, "Workflow"), (26, "Object Type"), (37, "Request Type")],
    );
    let mut u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A")]);
    u.profile = "baseline".into();

    let report = h.orchestrator(&u, "600").extract(&u).await.unwrap();

    let mut calls = h.extract_calls();
    calls.sort();
    assert_eq!(calls, vec!["extract 26", "extract 37", "extract 9"]);
    assert_eq!(report.metadata.kind, DeploymentKind::Baseline);
    assert!(report.metadata.bundles.iter().all(|b| b.entity.reference_code.is_none()));
    assert!(LocalStorage::new(h.state()).exists("metadata/baseline-metadata.json").await.unwrap());
}

#[tokio::test]
async fn functional_extracts_exactly_the_listed_pairs() {
    let h = Harness::new(StorageKind::Local);
    let entities = vec![EntityRef::new(9, "WF_A"), EntityRef::new(9, "WF_B"), EntityRef::new(26, "OT_C")];
    let u = unit("dev-ppm", "test-ppm", entities.clone());

    let report = h.orchestrator(&u, "601").extract(&u).await.unwrap();

    assert_eq!(h.extract_calls().len(), 3);
    let extracted: Vec<EntityRef> = report.metadata.bundles.iter().map(|b| b.entity.clone()).collect();
    assert_eq!(extracted, entities);
}

#[tokio::test]
async fn governance_failure_blocks_extraction() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "prod-ppm", vec![EntityRef::new(9, "WF_A")]);

    let err = h.orchestrator(&u, "700").deploy(&u).await.unwrap_err();

    let DeployError::Validation(errors) = &err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.iter().any(|e| e.contains("must deploy to test next")));
    assert!(errors.iter().any(|e| e.contains("rollback reference")));
    assert_eq!(err.class(), ErrorClass::Validation);
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn invalid_flag_profile_fails_before_extraction() {
    let h = Harness::new(StorageKind::Local);
    // Replacing portfolio types without replacing modules does not compile.
    h.write_profile("functional", DeploymentKind::Functional, &[Capability::ReplacePortfolioType], &[]);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A")]);

    let err = h.orchestrator(&u, "705").deploy(&u).await.unwrap_err();

    assert!(matches!(err, DeployError::Config(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(h.calls().is_empty());
    let store = LocalStorage::new(h.state());
    assert!(!store.exists("metadata/functional-metadata.json").await.unwrap());
}

#[tokio::test]
async fn archive_after_fresh_extract_needs_a_fresh_import() {
    let h = Harness::new(StorageKind::Local);
    let deployed = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A")]);
    h.orchestrator(&deployed, "900").deploy(&deployed).await.unwrap();
    let imports = h.import_calls().len();

    let next = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_NEVER_IMPORTED")]);
    let orchestrator = h.orchestrator(&next, "901");
    orchestrator.extract(&next).await.unwrap();
    let err = orchestrator.archive(&next).await.unwrap_err();

    assert!(matches!(err, DeployError::ImportNotFound(_)));
    assert_eq!(h.import_calls().len(), imports);
    let store = LocalStorage::new(h.state());
    assert!(read_index(&store, "rollback/901.json").await.unwrap_err().is_not_found());
    assert_eq!(read_index(&store, layout::LATEST_INDEX).await.unwrap().pipeline_id, "900");
}

#[tokio::test]
async fn failed_extraction_writes_no_metadata() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(999, "GONE")]);

    let err = h.orchestrator(&u, "701").extract(&u).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::ExternalTool);
    assert!(!err.is_retryable());
    let store = LocalStorage::new(h.state());
    assert!(!store.exists("metadata/functional-metadata.json").await.unwrap());

    let err = h.orchestrator(&u, "701").import(&u).await.unwrap_err();
    assert!(matches!(err, DeployError::MetadataNotFound(_)));
}

#[tokio::test]
async fn failed_import_is_archived_for_audit() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(998, "LOCKED")]);

    let err = h.orchestrator(&u, "702").deploy(&u).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::ExternalTool);

    let store = LocalStorage::new(h.state());
    let index = read_index(&store, "rollback/702.json").await.unwrap();
    let manifest: ArchiveManifest = serde_json::from_slice(
        &store
            .get(&layout::archive_object(&index.archive_key, layout::MANIFEST_FILE))
            .await
            .unwrap(),
    )
    .unwrap();
    assert!(matches!(manifest.import_outcome, ImportOutcome::Failed { ref message } if message.contains("locked entity")));
    assert!(read_index(&store, layout::LATEST_INDEX).await.unwrap_err().is_not_found());

    // The failed outcome is on record, so a separate archive run refuses.
    let err = h.orchestrator(&u, "702").archive(&u).await.unwrap_err();
    assert!(matches!(err, DeployError::Mismatch(_)));
}

#[tokio::test]
async fn interrupted_archive_leaves_nothing_to_roll_back_to() {
    let h = Harness::new(StorageKind::Local);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A"), EntityRef::new(9, "WF_B")]);
    let orchestrator = h.orchestrator(&u, "703");
    orchestrator.extract(&u).await.unwrap();
    orchestrator.import(&u).await.unwrap();

    std::fs::remove_file(h.state().join("bundles/functional/extract-9-WF_B.xml")).unwrap();
    let err = orchestrator.archive(&u).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);

    let store = LocalStorage::new(h.state());
    assert!(read_index(&store, "rollback/703.json").await.unwrap_err().is_not_found());
    assert!(read_index(&store, layout::LATEST_INDEX).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn object_store_deploy_records_remote_url() {
    let h = Harness::new(StorageKind::ObjectStore);
    let u = unit("dev-ppm", "test-ppm", vec![EntityRef::new(9, "WF_A")]);

    let report = h.orchestrator(&u, "800").deploy(&u).await.unwrap();

    let index = &report.receipt.index;
    assert_eq!(index.storage, StorageKind::ObjectStore);
    let expected = format!("s3://ppm-archives/promote/archives/{}/", index.archive_key);
    assert_eq!(index.remote_url.as_deref(), Some(expected.as_str()));
    assert_eq!(index.locations.len(), 2);
    assert!(h.root().join("bucket-root/ppm-archives/promote/rollback/800.json").exists());
    assert!(h.state().join("rollback/800.json").exists());
}
