//! promote-deploy — deployment orchestration and rollback.
//!
//! - **`orchestrator`**: extract → import → archive over pluggable backends
//! - **`phase`**: run state machine with rejected illegal transitions
//! - **`rollback`**: ordered tier search, safety check, replay of archived flags
//! - **`artifacts`**: CI pipeline artifacts as the first rollback tier
//! - **`governance`**: promotion rules checked before extraction
//! - **`pool`**: bounded fan-out for per-entity utility calls

pub mod artifacts;
pub mod error;
pub mod governance;
pub mod orchestrator;
pub mod phase;
pub mod pool;
pub mod rollback;

pub use artifacts::{ArtifactHandle, ArtifactSource, DirectoryArtifacts, GitlabArtifacts};
pub use error::{DeployError, DeployResult, ErrorClass};
pub use governance::{AllowAll, GovernanceValidator, RuleValidator, Verdict};
pub use orchestrator::{ArchiveReport, DeploymentReport, ExtractReport, ImportReport, Orchestrator};
pub use phase::{DeploymentRun, RunPhase};
pub use rollback::{
    ResolvedFrom, RollbackEngine, RollbackResult, TIER_ORDER, Tier, TierAttempt, TierOutcome,
};
