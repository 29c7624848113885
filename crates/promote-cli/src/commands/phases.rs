use std::path::Path;

use promote_core::{EnvCredentials, PromoteConfig};
use promote_deploy::Orchestrator;

use super::load_unit;

fn orchestrator(
    config: &PromoteConfig,
    unit: &promote_core::DeploymentUnit,
    branch: Option<&str>,
) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config, unit, &EnvCredentials)?;
    Ok(match branch {
        Some(branch) => {
            let mut provenance = orchestrator.provenance().clone();
            provenance.branch = Some(branch.to_string());
            orchestrator.with_provenance(provenance)
        }
        None => orchestrator,
    })
}

pub async fn extract(config: &PromoteConfig, bom: &Path, branch: Option<&str>) -> anyhow::Result<()> {
    let unit = load_unit(bom)?;
    let report = orchestrator(config, &unit, branch)?.extract(&unit).await?;
    println!(
        "✓ Extracted {} bundle(s) from {} (run {})",
        report.metadata.bundles.len(),
        unit.source,
        report.run.run_id
    );
    for bundle in &report.metadata.bundles {
        println!("  {} {}", bundle.entity, bundle.file_name);
    }
    Ok(())
}

pub async fn import(config: &PromoteConfig, bom: &Path, branch: Option<&str>) -> anyhow::Result<()> {
    let unit = load_unit(bom)?;
    let report = orchestrator(config, &unit, branch)?.import(&unit).await?;
    println!(
        "✓ Imported {} bundle(s) into {} with flags {}",
        report.results.len(),
        unit.target,
        report.flags
    );
    for result in &report.results {
        println!("  {} {} ({} ms)", result.entity, result.file_name, result.elapsed_ms);
    }
    Ok(())
}

pub async fn archive(config: &PromoteConfig, bom: &Path, branch: Option<&str>) -> anyhow::Result<()> {
    let unit = load_unit(bom)?;
    let report = orchestrator(config, &unit, branch)?.archive(&unit).await?;
    print_archive(&report.receipt);
    Ok(())
}

pub async fn deploy(config: &PromoteConfig, bom: &Path, branch: Option<&str>) -> anyhow::Result<()> {
    let unit = load_unit(bom)?;
    let report = orchestrator(config, &unit, branch)?.deploy(&unit).await?;
    println!(
        "✓ Deployed {} bundle(s) {} → {} with flags {}",
        report.results.len(),
        unit.source,
        unit.target,
        report.flags
    );
    println!("  phases: {}", report.run.phase_names().join(" → "));
    print_archive(&report.receipt);
    Ok(())
}

fn print_archive(receipt: &promote_archive::ArchiveReceipt) {
    println!("✓ Archived {}", receipt.archive_key);
    println!("  evidence: {}", receipt.evidence_key);
    println!("  rollback index: {}", receipt.index_location.uri());
    if let Some(url) = &receipt.index.remote_url {
        println!("  remote: {url}");
    }
}
