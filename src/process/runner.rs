// ABOUTME: CommandRunner trait and its tokio::process implementation
// Foreground children (tunnel, sync watch) are supervised with SIGINT/SIGTERM forwarding

use super::{CommandSpec, ProcessError};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Executes external commands. Every non-zero exit is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with inherited stdio
    async fn run(&self, command: &CommandSpec) -> Result<(), ProcessError>;

    /// Run to completion and return captured stdout
    async fn output(&self, command: &CommandSpec) -> Result<String, ProcessError>;

    /// Run silently and report whether it exited successfully
    async fn succeeds(&self, command: &CommandSpec) -> Result<bool, ProcessError>;

    /// Run a long-lived foreground child until it exits or this process is signalled.
    /// SIGINT and SIGTERM are forwarded to the child before returning `Interrupted`.
    async fn supervise(&self, command: &CommandSpec) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

fn spawn_error(command: &CommandSpec) -> impl FnOnce(std::io::Error) -> ProcessError + '_ {
    move |source| ProcessError::Spawn {
        command: command.to_string(),
        source,
    }
}

fn check_status(command: &CommandSpec, status: ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Failed {
            command: command.to_string(),
            code: status.code(),
        })
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<(), ProcessError> {
        debug!("Running command: {}", command);
        let status = command
            .to_command()
            .status()
            .await
            .map_err(spawn_error(command))?;
        check_status(command, status)
    }

    async fn output(&self, command: &CommandSpec) -> Result<String, ProcessError> {
        debug!("Running command: {}", command);
        let output = command
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(spawn_error(command))?;
        check_status(command, output.status)?;

        String::from_utf8(output.stdout).map_err(|_| ProcessError::InvalidOutput {
            command: command.to_string(),
        })
    }

    async fn succeeds(&self, command: &CommandSpec) -> Result<bool, ProcessError> {
        debug!("Probing command: {}", command);
        let status = command
            .to_command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(spawn_error(command))?;
        Ok(status.success())
    }

    async fn supervise(&self, command: &CommandSpec) -> Result<(), ProcessError> {
        debug!("Supervising command: {}", command);
        let mut child = command
            .to_command()
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error(command))?;
        let mut terminate = signal(SignalKind::terminate())?;

        let forwarded = tokio::select! {
            status = child.wait() => return check_status(command, status?),
            _ = tokio::signal::ctrl_c() => Signal::SIGINT,
            _ = terminate.recv() => Signal::SIGTERM,
        };

        info!("Received {}, stopping {}", forwarded.as_str(), command.program);
        let pid = child.id().and_then(|id| i32::try_from(id).ok());
        match pid {
            Some(pid) => {
                if let Err(e) = kill(Pid::from_raw(pid), forwarded) {
                    warn!("Failed to forward {} to pid {}: {}", forwarded.as_str(), pid, e);
                    child.start_kill()?;
                }
            }
            None => debug!("{} already exited", command.program),
        }
        child.wait().await?;

        Err(ProcessError::Interrupted {
            command: command.to_string(),
            signal: forwarded.as_str().to_string(),
        })
    }
}
