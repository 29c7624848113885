//! Remote execution: the migration utility runs on the application server,
//! reached over ssh. Bundles move with scp.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use promote_core::{Bundle, CompiledFlags, Credentials, EntityRef, I18nMode, RefdataMode};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{self, CommandOutput};
use crate::error::{ExecError, ExecResult};
use crate::kmigrator::{self, Tools};
use crate::{ImportResult, scratch_name};

/// ssh reports its own failures (refused, auth, host key) with this status.
const SSH_TRANSPORT_STATUS: i32 = 255;
/// A remote command exiting 255 is reported as this instead, so that 255
/// only ever comes from ssh itself.
const REMOTE_255_STATUS: i32 = 254;
/// sshpass: 5 = wrong password, 6 = unknown host key.
const SSHPASS_TRANSPORT_STATUS: [i32; 2] = [5, 6];

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub remote_dir: String,
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn base_command(&self, program: &str, port_flag: &str) -> Command {
        let mut command = match &self.password {
            Some(password) => {
                let mut c = Command::new(&self.sshpass_program);
                c.arg("-e").arg(program).env("SSHPASS", password);
                c
            }
            None => {
                let mut c = Command::new(program);
                c.args(["-o", "BatchMode=yes"]);
                c
            }
        };
        command
            .arg(port_flag)
            .arg(self.port.to_string())
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs));
        if let Some(identity) = &self.identity_file {
            command.arg("-i").arg(identity);
        }
        command
    }

    fn ssh(&self, remote_command: &str) -> Command {
        let mut command = self.base_command(&self.ssh_program, "-p");
        command.arg(self.destination()).arg(format!(
            "{remote_command}; rc=$?; [ \"$rc\" -ne {SSH_TRANSPORT_STATUS} ] || rc={REMOTE_255_STATUS}; exit \"$rc\""
        ));
        command
    }

    fn scp(&self, from: &str, to: &str) -> Command {
        let mut command = self.base_command(&self.scp_program, "-P");
        command.arg(from).arg(to);
        command
    }

    fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.destination(), path)
    }

    fn is_transport_failure(&self, output: &CommandOutput) -> bool {
        match output.status {
            Some(SSH_TRANSPORT_STATUS) => true,
            Some(code) if self.password.is_some() => SSHPASS_TRANSPORT_STATUS.contains(&code),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    server: String,
    url: String,
    credentials: Credentials,
    tools: Tools,
    target: SshTarget,
    staging_dir: PathBuf,
    timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(
        server: impl Into<String>,
        url: impl Into<String>,
        credentials: Credentials,
        tools: Tools,
        target: SshTarget,
        staging_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            server: server.into(),
            url: url.into(),
            credentials,
            tools,
            target,
            staging_dir: staging_dir.into(),
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub async fn extract(&self, entity: &EntityRef) -> ExecResult<Bundle> {
        let file_name = Bundle::file_name_for(entity);
        let remote_dir = self.open_remote_dir().await?;
        let remote_file = format!("{remote_dir}/{file_name}");

        info!(server = %self.server, host = %self.target.host, entity = %entity, "extracting remotely");
        let result = self.extract_in(&remote_dir, &remote_file, entity, &file_name).await;
        self.close_remote_dir(&remote_dir).await;
        result
    }

    async fn extract_in(
        &self,
        remote_dir: &str,
        remote_file: &str,
        entity: &EntityRef,
        file_name: &str,
    ) -> ExecResult<Bundle> {
        let args = kmigrator::extract_args(&self.credentials, &self.url, entity, remote_file);
        self.run_tool(&self.tools.extract_script, &args, remote_dir, "extract").await?;

        let local_dir = self.local_workdir().await?;
        let local_file = local_dir.join(file_name);
        let copied = self
            .transfer(
                self.target.scp(&self.target.remote_path(remote_file), &local_file.to_string_lossy()),
                "download bundle",
            )
            .await;
        let result = match copied {
            Ok(()) => tokio::fs::read(&local_file)
                .await
                .map(|payload| Bundle::new(entity.clone(), payload, &self.server))
                .map_err(ExecError::from),
            Err(e) => Err(e),
        };
        remove_local(&local_dir).await;
        result
    }

    pub async fn import(
        &self,
        bundle: &Bundle,
        flags: &CompiledFlags,
        i18n: I18nMode,
        refdata: RefdataMode,
    ) -> ExecResult<ImportResult> {
        let local_dir = self.local_workdir().await?;
        let local_file = local_dir.join(&bundle.file_name);
        tokio::fs::write(&local_file, &bundle.payload).await?;

        let remote_dir = match self.open_remote_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                remove_local(&local_dir).await;
                return Err(e);
            }
        };
        let remote_file = format!("{remote_dir}/{}", bundle.file_name);

        info!(
            server = %self.server,
            host = %self.target.host,
            entity = %bundle.entity,
            flags = %flags,
            "importing remotely"
        );
        let started = Instant::now();
        let result = async {
            self.transfer(
                self.target.scp(&local_file.to_string_lossy(), &self.target.remote_path(&remote_file)),
                "upload bundle",
            )
            .await?;
            let args = kmigrator::import_args(&self.credentials, &self.url, &remote_file, flags, i18n, refdata);
            self.run_tool(&self.tools.import_script, &args, &remote_dir, "import").await
        }
        .await;

        self.close_remote_dir(&remote_dir).await;
        remove_local(&local_dir).await;

        let output = result?;
        Ok(ImportResult {
            entity: bundle.entity.clone(),
            file_name: bundle.file_name.clone(),
            output: output.stdout,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn open_remote_dir(&self) -> ExecResult<String> {
        let dir = format!("{}/{}", self.target.remote_dir.trim_end_matches('/'), scratch_name());
        let script = shell_words::join(["mkdir", "-p", dir.as_str()]);
        let output = self.exec(self.target.ssh(&script), "prepare remote directory").await?;
        if !output.success() {
            return Err(ExecError::ExternalTool {
                operation: "prepare remote directory".to_string(),
                status: output.status_label(),
                stderr: output.stderr,
            });
        }
        Ok(dir)
    }

    async fn close_remote_dir(&self, dir: &str) {
        let script = shell_words::join(["rm", "-rf", dir]);
        match self.exec(self.target.ssh(&script), "remove remote directory").await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(host = %self.target.host, dir, stderr = %output.stderr, "remote cleanup failed"),
            Err(e) => warn!(host = %self.target.host, dir, error = %e, "remote cleanup failed"),
        }
    }

    async fn run_tool(
        &self,
        script: &str,
        args: &[String],
        remote_dir: &str,
        operation: &str,
    ) -> ExecResult<CommandOutput> {
        let mut words = self.tools.launcher(script);
        words.extend(args.iter().cloned());
        let remote_command = format!(
            "cd {} && {}",
            shell_words::quote(remote_dir),
            shell_words::join(&words)
        );
        debug!(
            host = %self.target.host,
            command = %kmigrator::redacted(&words),
            "running migration utility"
        );

        let output = self.exec(self.target.ssh(&remote_command), operation).await?;
        if !output.success() {
            return Err(ExecError::ExternalTool {
                operation: operation.to_string(),
                status: output.status_label(),
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn transfer(&self, command: Command, operation: &str) -> ExecResult<()> {
        let output = self.exec(command, operation).await?;
        if output.success() {
            Ok(())
        } else {
            // scp does not separate connection errors from copy errors.
            Err(ExecError::Transport {
                host: self.target.host.clone(),
                message: format!("{operation} failed ({}): {}", output.status_label(), output.stderr),
            })
        }
    }

    /// Run an ssh/scp command, mapping connection failures to `Transport`.
    async fn exec(&self, command: Command, operation: &str) -> ExecResult<CommandOutput> {
        let output = command::run(command, operation, self.timeout)
            .await
            .map_err(|e| match e {
                ExecError::Spawn { program, message } => ExecError::Transport {
                    host: self.target.host.clone(),
                    message: format!("cannot start {program}: {message}"),
                },
                other => other,
            })?;
        if self.target.is_transport_failure(&output) {
            return Err(ExecError::Transport {
                host: self.target.host.clone(),
                message: output.stderr,
            });
        }
        Ok(output)
    }

    async fn local_workdir(&self) -> ExecResult<PathBuf> {
        let dir = self.staging_dir.join(scratch_name());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

async fn remove_local(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory");
    }
}
