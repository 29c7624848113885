use std::path::Path;

use promote_core::{EnvCredentials, PromoteConfig, RollbackReference};
use promote_deploy::{ResolvedFrom, RollbackEngine, TierOutcome};

use super::load_unit;

/// `reference` overrides the BOM's `rollback_reference`.
pub async fn rollback(config: &PromoteConfig, bom: &Path, reference: Option<&str>) -> anyhow::Result<()> {
    let mut unit = load_unit(bom)?;
    if let Some(reference) = reference {
        unit.rollback_reference = Some(RollbackReference::from(reference.to_string()));
    }

    let engine = RollbackEngine::from_config(config, &unit, &EnvCredentials)?;
    let result = engine.rollback(&unit).await?;

    for attempt in &result.attempts {
        match &attempt.outcome {
            TierOutcome::Hit => println!("  {}: found", attempt.tier),
            TierOutcome::Miss(reason) => println!("  {}: {reason}", attempt.tier),
        }
    }
    let from = match result.resolved_from {
        ResolvedFrom::LatestLocal => "latest local run".to_string(),
        ResolvedFrom::Tier(tier) => tier.to_string(),
    };
    println!(
        "✓ Rolled back {} to pipeline {} from {from}",
        result.index.target, result.index.pipeline_id
    );
    println!("  archive: {}", result.index.archive_key);
    println!("  flags: {}", result.flags);
    println!("  re-imported {} bundle(s)", result.results.len());
    Ok(())
}
