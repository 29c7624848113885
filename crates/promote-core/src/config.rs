//! promote.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialVars;
use crate::error::{CoreError, CoreResult};
use crate::types::StorageKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteConfig {
    #[serde(default)]
    pub deployment: DeploymentSettings,
    pub kmigrator: KmigratorConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Used by servers that do not name their own credential variables.
    #[serde(default)]
    pub default_credentials: Option<CredentialVars>,
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    #[serde(default)]
    pub execution: ExecutionKind,
    #[serde(default = "default_storage")]
    pub storage: StorageKind,
    /// Root of the local store: metadata, bundles, archives, rollback indexes.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Scratch space for utility output before it enters storage.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
    /// Maximum concurrent utility calls within a phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            execution: ExecutionKind::Local,
            storage: default_storage(),
            state_dir: default_state_dir(),
            staging_dir: default_staging_dir(),
            profiles_dir: default_profiles_dir(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmigratorConfig {
    pub extract_script: String,
    pub import_script: String,
    /// Run the scripts through this program (for example `bash`).
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default = "default_kmigrator_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    pub env_type: String,
    #[serde(default)]
    pub credentials: Option<CredentialVars>,
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username_env: String,
    /// When set, authentication goes through `sshpass -e`.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Parent of the per-run working directories on the remote host.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Script paths on the remote host. Default to the `[kmigrator]` paths.
    #[serde(default)]
    pub extract_script: Option<String>,
    #[serde(default)]
    pub import_script: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    #[serde(default = "default_sshpass_program")]
    pub sshpass_program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default = "default_object_prefix")]
    pub prefix: String,
    /// S3-compatible endpoint, e.g. a MinIO URL.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_object_program")]
    pub program: String,
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_object_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default = "default_pipeline_id_env")]
    pub pipeline_id_env: String,
    #[serde(default = "default_commit_sha_env")]
    pub commit_sha_env: String,
    #[serde(default = "default_branch_env")]
    pub branch_env: String,
    #[serde(default = "default_user_env")]
    pub user_env: String,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            pipeline_id_env: default_pipeline_id_env(),
            commit_sha_env: default_commit_sha_env(),
            branch_env: default_branch_env(),
            user_env: default_user_env(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSourceKind {
    #[default]
    None,
    Gitlab,
    Directory,
}

/// Where previous pipelines' job artifacts can be read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub source: ArtifactSourceKind,
    #[serde(default = "default_api_url_env")]
    pub api_url_env: String,
    #[serde(default = "default_project_id_env")]
    pub project_id_env: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Name of the job whose artifacts hold the archive.
    #[serde(default = "default_archive_job")]
    pub archive_job: String,
    /// Path of the state directory inside the job artifacts.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,
    /// For `source = "directory"`: one subdirectory per pipeline id.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_artifact_timeout")]
    pub timeout_secs: u64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            source: ArtifactSourceKind::None,
            api_url_env: default_api_url_env(),
            project_id_env: default_project_id_env(),
            token_env: default_token_env(),
            archive_job: default_archive_job(),
            artifact_root: default_artifact_root(),
            directory: None,
            timeout_secs: default_artifact_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    /// Regular expression matched against the whole branch name.
    pub pattern: String,
    pub allowed_env_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment types in promotion order; each step may advance by one.
    #[serde(default = "default_promotion_order")]
    pub promotion_order: Vec<String>,
    #[serde(default = "default_protected")]
    pub protected_env_types: Vec<String>,
    #[serde(default = "default_true")]
    pub require_rollback_reference: bool,
    #[serde(default = "default_true")]
    pub require_change_request: bool,
    #[serde(default)]
    pub branches: Vec<BranchRule>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            promotion_order: default_promotion_order(),
            protected_env_types: default_protected(),
            require_rollback_reference: true,
            require_change_request: true,
            branches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl PromoteConfig {
    pub fn from_toml(content: &str, origin: &str) -> CoreResult<Self> {
        let config: PromoteConfig =
            toml::from_str(content).map_err(|e| CoreError::parse(origin, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::read(path, e))?;
        Self::from_toml(&content, &path.display().to_string())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.kmigrator.extract_script.is_empty() || self.kmigrator.import_script.is_empty() {
            return Err(invalid("kmigrator.extract_script and import_script are required"));
        }
        if self.kmigrator.timeout_secs == 0 {
            return Err(invalid("kmigrator.timeout_secs must be positive"));
        }
        if self.deployment.concurrency == 0 {
            return Err(invalid("deployment.concurrency must be at least 1"));
        }

        for (name, server) in &self.servers {
            if server.url.is_empty() {
                return Err(invalid(format!("server `{name}` has no url")));
            }
            if server.credentials.is_none() && self.default_credentials.is_none() {
                return Err(invalid(format!(
                    "server `{name}` has no credentials and no default_credentials are set"
                )));
            }
            if self.deployment.execution == ExecutionKind::Remote && server.ssh.is_none() {
                return Err(invalid(format!(
                    "remote execution requires [servers.{name}.ssh]"
                )));
            }
            if self.governance.enabled
                && !self.governance.promotion_order.contains(&server.env_type)
            {
                tracing::warn!(
                    server = %name,
                    env_type = %server.env_type,
                    "server environment type is not in the promotion order"
                );
            }
        }

        if self.deployment.storage == StorageKind::ObjectStore && self.object_store.is_none() {
            return Err(invalid("storage = \"object_store\" requires [object_store]"));
        }
        if let Some(store) = &self.object_store {
            if store.bucket.is_empty() {
                return Err(invalid("object_store.bucket is empty"));
            }
        }

        if self.ci.artifacts.source == ArtifactSourceKind::Directory
            && self.ci.artifacts.directory.is_none()
        {
            return Err(invalid("ci.artifacts.source = \"directory\" requires ci.artifacts.directory"));
        }

        for rule in &self.governance.branches {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                invalid(format!("branch pattern `{}` is invalid: {e}", rule.pattern))
            })?;
        }
        Ok(())
    }

    pub fn server(&self, name: &str) -> CoreResult<&ServerConfig> {
        self.servers
            .get(name)
            .ok_or_else(|| invalid(format!("server `{name}` is not configured")))
    }

    /// Credential variable names for a server, falling back to the defaults.
    pub fn credential_vars(&self, name: &str) -> CoreResult<&CredentialVars> {
        let server = self.server(name)?;
        server
            .credentials
            .as_ref()
            .or(self.default_credentials.as_ref())
            .ok_or_else(|| invalid(format!("no credentials configured for server `{name}`")))
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidConfig(message.into())
}

// Default value functions

fn default_storage() -> StorageKind {
    StorageKind::Local
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("profiles")
}

fn default_concurrency() -> usize {
    1
}

fn default_kmigrator_timeout() -> u64 {
    1800
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_dir() -> String {
    "/tmp/promote".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

fn default_sshpass_program() -> String {
    "sshpass".to_string()
}

fn default_object_prefix() -> String {
    "promote".to_string()
}

fn default_object_program() -> String {
    "aws".to_string()
}

fn default_access_key_env() -> String {
    "AWS_ACCESS_KEY_ID".to_string()
}

fn default_secret_key_env() -> String {
    "AWS_SECRET_ACCESS_KEY".to_string()
}

fn default_object_timeout() -> u64 {
    300
}

fn default_pipeline_id_env() -> String {
    "CI_PIPELINE_ID".to_string()
}

fn default_commit_sha_env() -> String {
    "CI_COMMIT_SHA".to_string()
}

fn default_branch_env() -> String {
    "CI_COMMIT_BRANCH".to_string()
}

fn default_user_env() -> String {
    "GITLAB_USER_LOGIN".to_string()
}

fn default_api_url_env() -> String {
    "CI_API_V4_URL".to_string()
}

fn default_project_id_env() -> String {
    "CI_PROJECT_ID".to_string()
}

fn default_token_env() -> String {
    "GITLAB_API_TOKEN".to_string()
}

fn default_archive_job() -> String {
    "archive".to_string()
}

fn default_artifact_root() -> String {
    "state".to_string()
}

fn default_artifact_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_promotion_order() -> Vec<String> {
    vec!["dev".into(), "test".into(), "prod".into()]
}

fn default_protected() -> Vec<String> {
    vec!["prod".into()]
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[deployment]
state_dir = "/var/lib/promote"

[kmigrator]
extract_script = "/opt/ppm/bin/kMigratorExtract.sh"
import_script = "/opt/ppm/bin/kMigratorImport.sh"
interpreter = "bash"

[default_credentials]
username_env = "PPM_USERNAME"
password_env = "PPM_PASSWORD"

[servers.dev-ppm]
url = "https://dev.ppm.example.com"
env_type = "dev"

[servers.prod-ppm]
url = "https://ppm.example.com"
env_type = "prod"
credentials = { username_env = "PPM_PROD_USER", password_env = "PPM_PROD_PASSWORD" }

[[governance.branches]]
pattern = "feature/.*"
allowed_env_types = ["dev"]
"#;

    #[test]
    fn parse_config_with_defaults() {
        let config = PromoteConfig::from_toml(CONFIG, "promote.toml").unwrap();
        assert_eq!(config.deployment.execution, ExecutionKind::Local);
        assert_eq!(config.deployment.storage, StorageKind::Local);
        assert_eq!(config.deployment.concurrency, 1);
        assert_eq!(config.kmigrator.timeout_secs, 1800);
        assert_eq!(config.ci.pipeline_id_env, "CI_PIPELINE_ID");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.governance.enabled);
    }

    #[test]
    fn credential_vars_fall_back_to_defaults() {
        let config = PromoteConfig::from_toml(CONFIG, "promote.toml").unwrap();
        assert_eq!(config.credential_vars("dev-ppm").unwrap().username_env, "PPM_USERNAME");
        assert_eq!(config.credential_vars("prod-ppm").unwrap().username_env, "PPM_PROD_USER");
        assert!(config.credential_vars("nope").is_err());
    }

    #[test]
    fn remote_execution_requires_ssh() {
        let content = CONFIG.replace("[deployment]", "[deployment]\nexecution = \"remote\"");
        let err = PromoteConfig::from_toml(&content, "promote.toml").unwrap_err();
        assert!(err.to_string().contains("ssh"));
    }

    #[test]
    fn object_store_requires_section() {
        let content = CONFIG.replace("[deployment]", "[deployment]\nstorage = \"object_store\"");
        assert!(PromoteConfig::from_toml(&content, "promote.toml").is_err());

        let content = format!("{content}\n[object_store]\nbucket = \"ppm-archives\"\n");
        let config = PromoteConfig::from_toml(&content, "promote.toml").unwrap();
        let store = config.object_store.unwrap();
        assert_eq!(store.program, "aws");
        assert_eq!(store.prefix, "promote");
    }

    #[test]
    fn bad_branch_pattern_rejected() {
        let content = CONFIG.replace("feature/.*", "feature/(");
        assert!(PromoteConfig::from_toml(&content, "promote.toml").is_err());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let content = CONFIG.replace("[deployment]", "[deployment]\nconcurrency = 0");
        assert!(PromoteConfig::from_toml(&content, "promote.toml").is_err());
    }
}
