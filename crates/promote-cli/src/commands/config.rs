use std::path::Path;

use promote_core::PromoteConfig;

pub fn check(config: &PromoteConfig, path: &Path) -> anyhow::Result<()> {
    println!("✓ {} is valid", path.display());
    println!(
        "  execution: {:?}, storage: {}, concurrency: {}",
        config.deployment.execution, config.deployment.storage, config.deployment.concurrency
    );
    println!("  servers: {}", config.servers.keys().cloned().collect::<Vec<_>>().join(", "));
    match &config.object_store {
        Some(store) => println!("  object store: s3://{}/{}", store.bucket, store.prefix),
        None => println!("  object store: not configured"),
    }
    println!("  governance: {}", if config.governance.enabled { "enabled" } else { "disabled" });
    Ok(())
}

/// Secrets are never part of the configuration, only the names of the
/// variables holding them.
pub fn show(config: &PromoteConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
