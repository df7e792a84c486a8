// ABOUTME: Bidirectional file sync between the local sync root and the remote instance using unison
// Phases run strictly in order: provision root, purge root-owned files, forced push, watch loop

use crate::process::{shell_quote, CommandRunner, CommandSpec, ProcessError};
use crate::provider::{InstanceProvider, ProviderError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    ProvisionRoot,
    CleanRootOwned,
    InitialPush,
    Watch,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProvisionRoot => "provisioning remote sync root",
            Self::CleanRootOwned => "removing root-owned files",
            Self::InitialPush => "initial push",
            Self::Watch => "watch loop",
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync failed while {phase}: {source}")]
    Remote {
        phase: SyncPhase,
        #[source]
        source: ProviderError,
    },
    #[error("Sync failed during {phase}: {source}")]
    Unison {
        phase: SyncPhase,
        #[source]
        source: ProcessError,
    },
}

impl SyncError {
    pub fn phase(&self) -> SyncPhase {
        match self {
            Self::Remote { phase, .. } | Self::Unison { phase, .. } => *phase,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Unison { source, .. } if source.is_interrupted())
    }
}

/// Unison ignore expression matching `name` at any depth, as file or
/// directory, dotted or not. Metacharacters in `name` are passed through.
pub fn ignore_expression(name: &str) -> String {
    format!("Name {{,.*,*,*/,.*/}}{name}{{.*,*,*/,.*/}}")
}

/// `-ignore <expr>` for every name, in input order
pub fn ignore_args(names: &[String]) -> Vec<String> {
    names
        .iter()
        .flat_map(|name| ["-ignore".to_string(), ignore_expression(name)])
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnisonMode {
    Push,
    Watch,
}

/// Drives unison for one sync root. The local replica is always preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEngine {
    root: PathBuf,
    remote_user: String,
    key_path: PathBuf,
    ignore_dirs: Vec<String>,
    /// Subpaths of the root to restrict sync to; empty means the whole root
    paths: Vec<String>,
    initial_push: bool,
}

impl SyncEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        remote_user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            remote_user: remote_user.into(),
            key_path: key_path.into(),
            ignore_dirs: Vec::new(),
            paths: Vec::new(),
            initial_push: true,
        }
    }

    pub fn with_ignore_dirs(mut self, ignore_dirs: Vec<String>) -> Self {
        self.ignore_dirs = ignore_dirs;
        self
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_initial_push(mut self, initial_push: bool) -> Self {
        self.initial_push = initial_push;
        self
    }

    fn root_str(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    /// Remote shell command creating the root, owned by the login user
    pub fn provision_command(&self) -> String {
        format!(
            "sudo install -d -o {user} -g {user} -p {root}",
            user = self.remote_user,
            root = shell_quote(&self.root_str())
        )
    }

    /// Remote shell command deleting everything under the root owned by root
    pub fn cleanup_command(&self) -> String {
        format!(
            "sudo find {} -user root -prune -exec rm -rf {{}} +",
            shell_quote(&self.root_str())
        )
    }

    fn unison_command(&self, ip: &str, mode: UnisonMode) -> CommandSpec {
        let root = self.root_str();
        let mut cmd = CommandSpec::new("unison")
            .arg(&root)
            .arg(format!("ssh://{}@{}/{}", self.remote_user, ip, root))
            .args(["-prefer", root.as_str(), "-batch", "-sshargs"])
            .arg(format!("-i {}", self.key_path.to_string_lossy()))
            .args(ignore_args(&self.ignore_dirs));

        for path in &self.paths {
            cmd = cmd.args(["-path", path.as_str()]);
        }

        match mode {
            UnisonMode::Push => cmd.args(["-force", root.as_str()]),
            UnisonMode::Watch => cmd.args(["-repeat", "watch"]),
        }
    }

    /// One-shot, local-authoritative push
    pub fn push_command(&self, ip: &str) -> CommandSpec {
        self.unison_command(ip, UnisonMode::Push)
    }

    /// Long-running bidirectional watch
    pub fn watch_command(&self, ip: &str) -> CommandSpec {
        self.unison_command(ip, UnisonMode::Watch)
    }

    /// Run every phase in order. Blocks in the watch loop until unison exits
    /// or perry is interrupted.
    pub async fn run(
        &self,
        provider: &dyn InstanceProvider,
        runner: &dyn CommandRunner,
        ip: &str,
    ) -> Result<(), SyncError> {
        info!("Ensuring remote directories exist");
        provider
            .ssh_run(&self.key_path, &self.provision_command())
            .await
            .map_err(|source| SyncError::Remote {
                phase: SyncPhase::ProvisionRoot,
                source,
            })?;

        info!("Deleting files owned by root under {}", self.root.display());
        provider
            .ssh_run(&self.key_path, &self.cleanup_command())
            .await
            .map_err(|source| SyncError::Remote {
                phase: SyncPhase::CleanRootOwned,
                source,
            })?;

        if self.initial_push {
            info!("Pushing local files in {} to remote", self.root.display());
            let push = self.push_command(ip);
            debug!("Running command: {}", push);
            runner.run(&push).await.map_err(|source| SyncError::Unison {
                phase: SyncPhase::InitialPush,
                source,
            })?;
        } else {
            info!("Skipping initial push");
        }

        info!("Watching local and remote filesystems for changes");
        let watch = self.watch_command(ip);
        debug!("Running command: {}", watch);
        runner
            .supervise(&watch)
            .await
            .map_err(|source| SyncError::Unison {
                phase: SyncPhase::Watch,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockCommandRunner;
    use crate::provider::MockInstanceProvider;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn engine() -> SyncEngine {
        SyncEngine::new("/home/dev", "ubuntu", "/home/dev/.ssh/id_rsa_x")
            .with_ignore_dirs(vec!["node_modules".to_string(), ".venv".to_string()])
    }

    #[test]
    fn test_ignore_expression_shape() {
        assert_eq!(
            ignore_expression("node_modules"),
            "Name {,.*,*,*/,.*/}node_modules{.*,*,*/,.*/}"
        );
    }

    #[test]
    fn test_ignore_args_one_per_name() {
        let args = ignore_args(&["a".to_string(), "b".to_string()]);
        assert_eq!(
            args,
            vec![
                "-ignore",
                "Name {,.*,*,*/,.*/}a{.*,*,*/,.*/}",
                "-ignore",
                "Name {,.*,*,*/,.*/}b{.*,*,*/,.*/}"
            ]
        );
        assert_eq!(ignore_args(&["a".to_string(), "b".to_string()]), args);
        assert!(ignore_args(&[]).is_empty());
    }

    #[test]
    fn test_remote_commands() {
        let engine = engine();
        assert_eq!(
            engine.provision_command(),
            "sudo install -d -o ubuntu -g ubuntu -p /home/dev"
        );
        assert_eq!(
            engine.cleanup_command(),
            "sudo find /home/dev -user root -prune -exec rm -rf {} +"
        );

        let spaced = SyncEngine::new("/home/a b", "ubuntu", "/k");
        assert_eq!(
            spaced.provision_command(),
            "sudo install -d -o ubuntu -g ubuntu -p '/home/a b'"
        );
    }

    #[test]
    fn test_push_and_watch_differ_only_in_mode() {
        let engine = engine();
        let push = engine.push_command("3.3.3.3");
        let watch = engine.watch_command("3.3.3.3");

        assert_eq!(
            &push.argv()[..9],
            &[
                "unison",
                "/home/dev",
                "ssh://ubuntu@3.3.3.3//home/dev",
                "-prefer",
                "/home/dev",
                "-batch",
                "-sshargs",
                "-i /home/dev/.ssh/id_rsa_x",
                "-ignore",
            ]
        );
        assert_eq!(push.flag_values("-force"), vec!["/home/dev"]);
        assert!(push.flag_values("-repeat").is_empty());
        assert_eq!(watch.flag_values("-repeat"), vec!["watch"]);
        assert_eq!(watch.count_flag("-force"), 0);
        assert_eq!(push.count_flag("-ignore"), 2);
        assert_eq!(watch.count_flag("-ignore"), 2);
    }

    #[test]
    fn test_paths_restrict_sync() {
        let engine = engine().with_paths(vec!["src/app".to_string(), "docs".to_string()]);
        let watch = engine.watch_command("3.3.3.3");
        assert_eq!(watch.flag_values("-path"), vec!["src/app", "docs"]);
    }

    fn expect_remote_setup(provider: &mut MockInstanceProvider, seq: &mut Sequence) {
        provider
            .expect_ssh_run()
            .withf(|_, cmd| cmd.starts_with("sudo install -d"))
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
        provider
            .expect_ssh_run()
            .withf(|_, cmd| cmd.starts_with("sudo find"))
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let mut seq = Sequence::new();
        let mut provider = MockInstanceProvider::new();
        let mut runner = MockCommandRunner::new();

        expect_remote_setup(&mut provider, &mut seq);
        runner
            .expect_run()
            .withf(|cmd| cmd.program == "unison" && cmd.count_flag("-force") == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        runner
            .expect_supervise()
            .withf(|cmd| cmd.program == "unison" && cmd.flag_values("-repeat") == vec!["watch"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        engine().run(&provider, &runner, "3.3.3.3").await.unwrap();
    }

    #[tokio::test]
    async fn test_push_can_be_skipped() {
        let mut seq = Sequence::new();
        let mut provider = MockInstanceProvider::new();
        let mut runner = MockCommandRunner::new();

        expect_remote_setup(&mut provider, &mut seq);
        runner.expect_run().never();
        runner
            .expect_supervise()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        engine()
            .with_initial_push(false)
            .run(&provider, &runner, "3.3.3.3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_push_stops_before_watch() {
        let mut seq = Sequence::new();
        let mut provider = MockInstanceProvider::new();
        let mut runner = MockCommandRunner::new();

        expect_remote_setup(&mut provider, &mut seq);
        runner.expect_run().times(1).returning(|cmd| {
            Err(ProcessError::Failed {
                command: cmd.to_string(),
                code: Some(2),
            })
        });
        runner.expect_supervise().never();

        let err = engine().run(&provider, &runner, "3.3.3.3").await.unwrap_err();
        assert_eq!(err.phase(), SyncPhase::InitialPush);
        assert!(!err.is_interrupted());
    }

    #[tokio::test]
    async fn test_failed_provision_stops_everything() {
        let mut provider = MockInstanceProvider::new();
        let mut runner = MockCommandRunner::new();

        provider
            .expect_ssh_run()
            .times(1)
            .returning(|_, _| Err(ProviderError::IpUnresolved("i-0abc".to_string())));
        runner.expect_run().never();
        runner.expect_supervise().never();

        let err = engine().run(&provider, &runner, "3.3.3.3").await.unwrap_err();
        assert_eq!(err.phase(), SyncPhase::ProvisionRoot);
    }
}
