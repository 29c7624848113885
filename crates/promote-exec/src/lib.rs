//! promote-exec — execution backends for the migration utility.
//!
//! - **`local`**: runs the utility scripts on this host
//! - **`remote`**: runs them on the application server over ssh, moving bundles with scp
//! - **`kmigrator`**: argument contract of the utility
//! - **`command`**: timed child-process runner
//!
//! Backends never retry. Transport and timeout errors are marked retryable
//! and the caller decides.

pub mod command;
pub mod error;
pub mod kmigrator;
pub mod local;
pub mod remote;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use promote_core::config::ExecutionKind;
use promote_core::{
    Bundle, CompiledFlags, CredentialProvider, Credentials, EntityRef, I18nMode, PromoteConfig,
    RefdataMode,
};

pub use error::{ExecError, ExecResult};
pub use kmigrator::Tools;
pub use local::LocalExecutor;
pub use remote::{RemoteExecutor, SshTarget};

/// Outcome of one successful import call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub entity: EntityRef,
    pub file_name: String,
    pub output: String,
    pub elapsed_ms: u64,
}

/// Where the migration utility runs. Selected once per run.
#[derive(Debug, Clone)]
pub enum ExecutionBackend {
    Local(LocalExecutor),
    Remote(RemoteExecutor),
}

impl ExecutionBackend {
    /// Build the backend for `server` from configuration, resolving every
    /// credential up front.
    pub fn for_server(
        config: &PromoteConfig,
        server: &str,
        provider: &dyn CredentialProvider,
    ) -> ExecResult<Self> {
        let server_config = config.server(server)?;
        let credentials = Credentials::resolve(provider, config.credential_vars(server)?)?;
        let tools = Tools {
            extract_script: config.kmigrator.extract_script.clone(),
            import_script: config.kmigrator.import_script.clone(),
            interpreter: config.kmigrator.interpreter.clone(),
        };
        let staging_dir = config.deployment.staging_dir.join(server);
        let timeout = Duration::from_secs(config.kmigrator.timeout_secs);

        match config.deployment.execution {
            ExecutionKind::Local => Ok(ExecutionBackend::Local(LocalExecutor::new(
                server,
                &server_config.url,
                credentials,
                tools,
                staging_dir,
                timeout,
            ))),
            ExecutionKind::Remote => {
                let ssh = server_config.ssh.as_ref().ok_or_else(|| {
                    promote_core::CoreError::InvalidConfig(format!(
                        "remote execution requires [servers.{server}.ssh]"
                    ))
                })?;
                let password = match &ssh.password_env {
                    Some(name) => Some(provider.require(name)?),
                    None => None,
                };
                let target = SshTarget {
                    host: ssh.host.clone(),
                    port: ssh.port,
                    username: provider.require(&ssh.username_env)?,
                    password,
                    identity_file: ssh.identity_file.clone(),
                    connect_timeout_secs: ssh.connect_timeout_secs,
                    remote_dir: ssh.remote_dir.clone(),
                    ssh_program: ssh.ssh_program.clone(),
                    scp_program: ssh.scp_program.clone(),
                    sshpass_program: ssh.sshpass_program.clone(),
                };
                let tools = Tools {
                    extract_script: ssh.extract_script.clone().unwrap_or(tools.extract_script),
                    import_script: ssh.import_script.clone().unwrap_or(tools.import_script),
                    interpreter: tools.interpreter,
                };
                Ok(ExecutionBackend::Remote(RemoteExecutor::new(
                    server,
                    &server_config.url,
                    credentials,
                    tools,
                    target,
                    staging_dir,
                    timeout,
                )))
            }
        }
    }

    pub fn server(&self) -> &str {
        match self {
            ExecutionBackend::Local(e) => e.server(),
            ExecutionBackend::Remote(e) => e.server(),
        }
    }

    pub fn kind(&self) -> ExecutionKind {
        match self {
            ExecutionBackend::Local(_) => ExecutionKind::Local,
            ExecutionBackend::Remote(_) => ExecutionKind::Remote,
        }
    }

    pub async fn extract(&self, entity: &EntityRef) -> ExecResult<Bundle> {
        match self {
            ExecutionBackend::Local(e) => e.extract(entity).await,
            ExecutionBackend::Remote(e) => e.extract(entity).await,
        }
    }

    pub async fn import(
        &self,
        bundle: &Bundle,
        flags: &CompiledFlags,
        i18n: I18nMode,
        refdata: RefdataMode,
    ) -> ExecResult<ImportResult> {
        match self {
            ExecutionBackend::Local(e) => e.import(bundle, flags, i18n, refdata).await,
            ExecutionBackend::Remote(e) => e.import(bundle, flags, i18n, refdata).await,
        }
    }
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique scratch directory name for one utility call.
pub(crate) fn scratch_name() -> String {
    format!(
        "run-{}-{}",
        std::process::id(),
        SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
