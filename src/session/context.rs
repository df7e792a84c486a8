// ABOUTME: Docker CLI context switching between the tunnelled remote socket and the local default

use crate::process::{CommandRunner, CommandSpec, ProcessError};
use tracing::{debug, info};

pub const DEFAULT_CONTEXT: &str = "default";

/// A docker context named after the project code, pointing at the tunnel socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerContext {
    name: String,
    socket_path: String,
}

impl DockerContext {
    pub fn new(name: impl Into<String>, socket_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            socket_path: socket_path.into(),
        }
    }

    pub fn inspect_command(&self) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["context", "inspect", self.name.as_str()])
            .quiet()
    }

    pub fn create_command(&self) -> CommandSpec {
        CommandSpec::new("docker")
            .args(["context", "create", "--docker"])
            .arg(format!("host=unix://{}", self.socket_path))
            .arg(&self.name)
            .quiet()
    }

    /// Create the context if absent, then make it current
    pub async fn use_remote(&self, runner: &dyn CommandRunner) -> Result<(), ProcessError> {
        if runner.succeeds(&self.inspect_command()).await? {
            debug!("Docker context {} already exists", self.name);
        } else {
            info!("Creating docker context {}", self.name);
            runner.run(&self.create_command()).await?;
        }
        info!("Switching docker context to {}", self.name);
        runner.run(&use_command(&self.name)).await
    }
}

fn use_command(name: &str) -> CommandSpec {
    CommandSpec::new("docker")
        .args(["context", "use", name])
        .quiet()
}

/// Switch back to the built-in local context
pub async fn use_default(runner: &dyn CommandRunner) -> Result<(), ProcessError> {
    info!("Switching docker context to {}", DEFAULT_CONTEXT);
    runner.run(&use_command(DEFAULT_CONTEXT)).await
}
