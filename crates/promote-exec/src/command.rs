//! Timed child-process runner shared by both backends.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_label(&self) -> String {
        match self.status {
            Some(code) => format!("status {code}"),
            None => "signal".to_string(),
        }
    }
}

/// Run `command` to completion or until `limit` elapses.
///
/// A non-zero exit is returned as output, not as an error; callers decide
/// what the status means. On timeout the child is left running.
pub async fn run(mut command: Command, operation: &str, limit: Duration) -> ExecResult<CommandOutput> {
    let program = command.as_std().get_program().to_string_lossy().to_string();
    debug!(operation, program = %program, "spawning");

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let child = command.spawn().map_err(|e| ExecError::Spawn {
        program: program.clone(),
        message: e.to_string(),
    })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(e)) => Err(ExecError::Io(format!("{operation}: {e}"))),
        Err(_) => Err(ExecError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
