use std::path::Path;

use promote_core::{Capability, CapabilityKind, Profile, PromoteConfig};

/// `profile` is a path when it names an existing file, otherwise a profile
/// name under `profiles_dir`.
pub fn flags(config: Option<&PromoteConfig>, profile: &str, explain: bool) -> anyhow::Result<()> {
    let path = Path::new(profile);
    let profile = if path.is_file() {
        Profile::from_file(path)?
    } else {
        let Some(config) = config else {
            anyhow::bail!("`{profile}` is not a file and no configuration was loaded to find profiles_dir");
        };
        Profile::load(&config.deployment.profiles_dir, profile)?
    };
    let compiled = profile.compile()?;

    println!("{compiled}");
    if explain {
        for capability in Capability::TABLE {
            let kind = match capability.kind() {
                CapabilityKind::ReplaceExisting => "replace",
                CapabilityKind::AddMissing => "add",
            };
            let mark = if compiled.is_enabled(capability) { 'Y' } else { 'N' };
            println!("{:>2} {mark} {:<8} {}", capability.position(), kind, capability.label());
        }
    }
    Ok(())
}
