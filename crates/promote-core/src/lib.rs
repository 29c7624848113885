//! promote-core — shared types for configuration promotion.
//!
//! - **`flags`**: capability table and the positional flag compiler
//! - **`profile`**: deployment profiles (flags, kind, baseline entity types)
//! - **`unit`**: deployment units (BOMs) and rollback references
//! - **`types`**: bundles, bundle metadata, archive manifests, rollback indexes
//! - **`config`**: `promote.toml` parsing and validation
//! - **`credentials`**: credential provider and resolved credentials
//! - **`provenance`**: CI provenance recorded with each archive

pub mod config;
pub mod credentials;
pub mod error;
pub mod flags;
pub mod profile;
pub mod provenance;
pub mod types;
pub mod unit;

pub use config::PromoteConfig;
pub use credentials::{CredentialProvider, CredentialVars, Credentials, EnvCredentials, StaticCredentials};
pub use error::{CoreError, CoreResult};
pub use flags::{Capability, CapabilityKind, CompiledFlags, FLAG_COUNT, ProfileFlags, compile};
pub use profile::{DeploymentKind, EntityType, I18nMode, Profile, RefdataMode};
pub use provenance::Provenance;
pub use types::*;
pub use unit::{DeploymentUnit, EntityRef, LOCAL_MARKER, RollbackReference};
