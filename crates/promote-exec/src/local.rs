//! Local execution: the migration utility runs on this host.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use promote_core::{Bundle, CompiledFlags, Credentials, EntityRef, I18nMode, RefdataMode};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{self, CommandOutput};
use crate::error::{ExecError, ExecResult};
use crate::kmigrator::{self, Tools};
use crate::{ImportResult, scratch_name};

#[derive(Debug, Clone)]
pub struct LocalExecutor {
    server: String,
    url: String,
    credentials: Credentials,
    tools: Tools,
    staging_dir: PathBuf,
    timeout: Duration,
}

impl LocalExecutor {
    pub fn new(
        server: impl Into<String>,
        url: impl Into<String>,
        credentials: Credentials,
        tools: Tools,
        staging_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            server: server.into(),
            url: url.into(),
            credentials,
            tools,
            staging_dir: staging_dir.into(),
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub async fn extract(&self, entity: &EntityRef) -> ExecResult<Bundle> {
        let workdir = self.workdir().await?;
        let file_name = Bundle::file_name_for(entity);
        let out_path = workdir.join(&file_name);

        let args = kmigrator::extract_args(
            &self.credentials,
            &self.url,
            entity,
            &out_path.to_string_lossy(),
        );
        info!(server = %self.server, entity = %entity, "extracting");
        let output = self.run_tool(&self.tools.extract_script, &args, &workdir, "extract").await;
        let result = match output {
            Ok(output) => read_bundle(&out_path, entity, &self.server, &output).await,
            Err(e) => Err(e),
        };
        cleanup(&workdir).await;
        result
    }

    pub async fn import(
        &self,
        bundle: &Bundle,
        flags: &CompiledFlags,
        i18n: I18nMode,
        refdata: RefdataMode,
    ) -> ExecResult<ImportResult> {
        let workdir = self.workdir().await?;
        let in_path = workdir.join(&bundle.file_name);
        tokio::fs::write(&in_path, &bundle.payload).await?;

        let args = kmigrator::import_args(
            &self.credentials,
            &self.url,
            &in_path.to_string_lossy(),
            flags,
            i18n,
            refdata,
        );
        info!(server = %self.server, entity = %bundle.entity, flags = %flags, "importing");
        let started = Instant::now();
        let output = self.run_tool(&self.tools.import_script, &args, &workdir, "import").await;
        cleanup(&workdir).await;

        let output = output?;
        Ok(ImportResult {
            entity: bundle.entity.clone(),
            file_name: bundle.file_name.clone(),
            output: output.stdout,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn workdir(&self) -> ExecResult<PathBuf> {
        let dir = self.staging_dir.join(scratch_name());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run_tool(
        &self,
        script: &str,
        args: &[String],
        workdir: &Path,
        operation: &str,
    ) -> ExecResult<CommandOutput> {
        let mut launch = self.tools.launcher(script);
        let program = launch.remove(0);
        debug!(program = %program, args = %kmigrator::redacted(args), "running migration utility");

        let mut command = Command::new(&program);
        command.args(&launch).args(args).current_dir(workdir);

        let output = command::run(command, operation, self.timeout).await?;
        if !output.success() {
            return Err(ExecError::ExternalTool {
                operation: operation.to_string(),
                status: output.status_label(),
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

async fn read_bundle(
    path: &Path,
    entity: &EntityRef,
    source: &str,
    output: &CommandOutput,
) -> ExecResult<Bundle> {
    match tokio::fs::read(path).await {
        Ok(payload) => Ok(Bundle::new(entity.clone(), payload, source)),
        Err(e) => Err(ExecError::ExternalTool {
            operation: "extract".to_string(),
            status: output.status_label(),
            stderr: format!("no bundle written to {}: {e}", path.display()),
        }),
    }
}

async fn cleanup(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory");
    }
}
