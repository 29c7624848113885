use std::path::Path;

use promote_core::{CredentialProvider, EnvCredentials, Profile, PromoteConfig};
use promote_deploy::{GovernanceValidator, RuleValidator, Verdict};

use super::load_unit;

/// Check a BOM without touching any server: the BOM itself, its profile and
/// the governance rules for the given branch.
pub fn validate(config: &PromoteConfig, bom: &Path, branch: Option<&str>) -> anyhow::Result<()> {
    let unit = load_unit(bom)?;
    let profile = Profile::load(&config.deployment.profiles_dir, &unit.profile)?;
    let flags = profile.compile()?;

    let branch = branch
        .map(str::to_string)
        .or_else(|| EnvCredentials.var(&config.ci.branch_env));
    let verdict = if config.governance.enabled {
        RuleValidator::from_config(config)?.validate(&unit, branch.as_deref())
    } else {
        Verdict::Pass
    };

    match verdict {
        Verdict::Pass => {
            println!(
                "✓ {} v{}: {} → {} with profile {} ({})",
                unit.change_request_label(),
                unit.version,
                unit.source,
                unit.target,
                profile.name,
                profile.kind
            );
            println!("  flags: {flags}");
            Ok(())
        }
        Verdict::Fail(errors) => {
            for error in &errors {
                println!("✗ {error}");
            }
            anyhow::bail!("{} governance rule(s) failed", errors.len())
        }
    }
}
