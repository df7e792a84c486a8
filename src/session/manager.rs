// ABOUTME: RemoteSessionManager orchestrates the provider, tunnel, sync and docker context
// Each operation is one complete action against live cloud state; nothing is cached between calls

use super::context::{self, DockerContext};
use super::SessionError;
use crate::config::{current_username, PerryConfig, ProjectCode};
use crate::models::{InstanceHandle, KeyPairInfo, PortForwardSpec, StateChange};
use crate::process::{CommandRunner, SystemRunner};
use crate::provider::{AwsInstanceProvider, AwsSettings, InstanceProvider};
use crate::sync::SyncEngine;
use crate::tunnel::TunnelSupervisor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Values resolved once from the config and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub project_code: ProjectCode,
    pub key_path: PathBuf,
    /// Local login user; owns the tunnel socket
    pub local_user: String,
    pub forwards: PortForwardSpec,
    pub sync_root: PathBuf,
    pub sync_paths: Vec<String>,
    pub ignore_dirs: Vec<String>,
    pub initial_push: bool,
}

impl SessionSettings {
    pub fn from_config(config: &PerryConfig) -> Result<Self, SessionError> {
        let project_code = config.project_code()?;
        let key_path = config.key_path(&project_code)?;
        let sync_root = config.sync_root()?;
        let sync_paths = config.relative_sync_paths(&sync_root)?;
        let forwards = PortForwardSpec::new(
            project_code.socket_path(),
            config.local_port_forwards.clone(),
            config.remote_port_forwards.clone(),
        )
        .with_bind_address(config.bind_address.clone());

        Ok(Self {
            project_code,
            key_path,
            local_user: current_username()?,
            forwards,
            sync_root,
            sync_paths,
            ignore_dirs: config.ignore_dirs.clone(),
            initial_push: config.initial_push,
        })
    }
}

pub struct RemoteSessionManager {
    provider: Box<dyn InstanceProvider>,
    runner: Arc<dyn CommandRunner>,
    settings: SessionSettings,
}

impl RemoteSessionManager {
    pub fn new(
        provider: Box<dyn InstanceProvider>,
        runner: Arc<dyn CommandRunner>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            provider,
            runner,
            settings,
        }
    }

    /// Wire the AWS backend and real process runner from a loaded config
    pub fn from_config(config: &PerryConfig) -> Result<Self, SessionError> {
        let settings = SessionSettings::from_config(config)?;
        let code = &settings.project_code;
        let aws = AwsSettings {
            region: config.aws_region.clone(),
            profile: config.credentials_profile_name.clone(),
            instance_type: config.instance_type.clone(),
            ami: config.instance_ami.clone(),
            volume_size: config.volume_size,
            security_group_ids: config.security_group_ids.clone(),
            subnet_id: config.subnet_id.clone(),
            keypair_name: code.keypair_name(),
            service_name: code.service_name(),
            project_code: code.to_string(),
        };
        debug!("Using project code {}", code);

        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let provider = Box::new(AwsInstanceProvider::new(aws, Arc::clone(&runner)));
        Ok(Self::new(provider, runner, settings))
    }

    pub fn project_code(&self) -> &ProjectCode {
        &self.settings.project_code
    }

    pub fn key_path(&self) -> &Path {
        &self.settings.key_path
    }

    pub async fn create_keypair(&self) -> Result<KeyPairInfo, SessionError> {
        info!("Creating key pair for {}", self.project_code());
        Ok(self.provider.create_keypair(self.key_path()).await?)
    }

    /// Does not switch docker context; callers chain `use_remote_context`
    pub async fn create_instance(&self) -> Result<InstanceHandle, SessionError> {
        info!("Creating instance for {}", self.project_code());
        let handle = self.provider.create_instance(self.key_path()).await?;
        info!("Created instance {}", handle.instance_id);
        Ok(handle)
    }

    pub async fn start_instance(&self) -> Result<StateChange, SessionError> {
        info!("Starting instance for {}", self.project_code());
        Ok(self.provider.start_instance().await?)
    }

    pub async fn stop_instance(&self) -> Result<StateChange, SessionError> {
        info!("Stopping instance for {}", self.project_code());
        Ok(self.provider.stop_instance().await?)
    }

    pub async fn enable_termination_protection(&self) -> Result<(), SessionError> {
        info!("Enabling termination protection");
        Ok(self.provider.enable_termination_protection().await?)
    }

    pub async fn disable_termination_protection(&self) -> Result<(), SessionError> {
        info!("Disabling termination protection");
        Ok(self.provider.disable_termination_protection().await?)
    }

    pub async fn is_termination_protection_enabled(&self) -> Result<bool, SessionError> {
        Ok(self.provider.is_termination_protection_enabled().await?)
    }

    /// Irreversible. Callers must confirm before calling.
    pub async fn delete_instance(&self) -> Result<StateChange, SessionError> {
        warn!(
            "Deleting instance for {}; its volume and all remote data will be destroyed",
            self.project_code()
        );
        let change = self.provider.delete_instance().await?;
        warn!("Instance {} is {}", change.instance_id, change.current);
        Ok(change)
    }

    pub async fn get_ip(&self) -> Result<String, SessionError> {
        let ip = self.provider.get_ip().await?;
        debug!("Resolved instance IP {}", ip);
        Ok(ip)
    }

    pub fn tunnel(&self) -> TunnelSupervisor {
        TunnelSupervisor::new(
            self.settings.forwards.clone(),
            &self.settings.key_path,
            self.provider.username(),
            &self.settings.local_user,
        )
    }

    /// Blocks until the tunnel exits or perry is interrupted
    pub async fn start_tunnel(&self) -> Result<(), SessionError> {
        let ip = self.get_ip().await?;
        Ok(self.tunnel().run(self.runner.as_ref(), &ip).await?)
    }

    pub fn docker_context(&self) -> DockerContext {
        DockerContext::new(
            self.project_code().context_name(),
            self.settings.forwards.socket_path.clone(),
        )
    }

    pub async fn use_remote_context(&self) -> Result<(), SessionError> {
        Ok(self.docker_context().use_remote(self.runner.as_ref()).await?)
    }

    pub async fn use_default_context(&self) -> Result<(), SessionError> {
        Ok(context::use_default(self.runner.as_ref()).await?)
    }

    pub async fn ssh_connect(
        &self,
        command: Option<String>,
        options: Vec<String>,
    ) -> Result<(), SessionError> {
        Ok(self
            .provider
            .ssh_connect(self.key_path(), command, options)
            .await?)
    }

    pub async fn ssh_run(&self, command: &str) -> Result<(), SessionError> {
        Ok(self.provider.ssh_run(self.key_path(), command).await?)
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            &self.settings.sync_root,
            self.provider.username(),
            &self.settings.key_path,
        )
        .with_ignore_dirs(self.settings.ignore_dirs.clone())
        .with_paths(self.settings.sync_paths.clone())
        .with_initial_push(self.settings.initial_push)
    }

    /// Provision, clean, push, then watch. Blocks in the watch loop.
    pub async fn sync(&self) -> Result<(), SessionError> {
        let ip = self.get_ip().await?;
        Ok(self
            .sync_engine()
            .run(self.provider.as_ref(), self.runner.as_ref(), &ip)
            .await?)
    }
}
