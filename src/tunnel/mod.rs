// ABOUTME: SSH tunnel construction and supervision
// One ssh process carries the container runtime socket forward plus every TCP forward.
// Any forward failing to bind aborts the whole tunnel (ExitOnForwardFailure).

use crate::models::PortForwardSpec;
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use std::path::PathBuf;
use tracing::{debug, info};

/// Builds and runs the foreground `sudo ssh -N` process for a forward spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSupervisor {
    spec: PortForwardSpec,
    key_path: PathBuf,
    remote_user: String,
    /// Owner of the local socket once the forward is up
    local_user: String,
}

impl TunnelSupervisor {
    pub fn new(
        spec: PortForwardSpec,
        key_path: impl Into<PathBuf>,
        remote_user: impl Into<String>,
        local_user: impl Into<String>,
    ) -> Self {
        Self {
            spec,
            key_path: key_path.into(),
            remote_user: remote_user.into(),
            local_user: local_user.into(),
        }
    }

    /// Full argument vector for a tunnel to `ip`. Rebuilt per call since the IP
    /// changes across stop/start cycles.
    pub fn build_command(&self, ip: &str) -> CommandSpec {
        // binding a socket under /var/run needs root
        let mut cmd = CommandSpec::new("sudo")
            .args([
                "ssh",
                "-v",
                "-o",
                "ExitOnForwardFailure=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "ServerAliveInterval=60",
                "-N",
                "-T",
                "-i",
            ])
            .arg(self.key_path.to_string_lossy())
            .arg(format!("{}@{}", self.remote_user, ip));

        cmd = cmd
            .arg("-L")
            .arg(self.spec.socket_forward())
            .args([
                "-o",
                "StreamLocalBindUnlink=yes",
                "-o",
                "PermitLocalCommand=yes",
                "-o",
            ])
            .arg(format!(
                "LocalCommand=sudo chown {} {}",
                self.local_user, self.spec.socket_path
            ));

        for forward in self.spec.local_forwards() {
            cmd = cmd.arg("-L").arg(forward);
        }
        for forward in self.spec.remote_forwards() {
            cmd = cmd.arg("-R").arg(forward);
        }
        cmd
    }

    /// Run the tunnel in the foreground until ssh exits or perry is interrupted.
    /// No retries; a failed tunnel surfaces its exit code.
    pub async fn run(&self, runner: &dyn CommandRunner, ip: &str) -> Result<(), ProcessError> {
        let cmd = self.build_command(ip);

        info!("Starting tunnel to {}", ip);
        debug!("Running command: {}", cmd);
        debug!("Forwarding local: {:?}", self.spec.local);
        debug!("Forwarding remote: {:?}", self.spec.remote);

        runner.supervise(&cmd).await
    }
}
