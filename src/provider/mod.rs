// ABOUTME: Instance provider abstraction over cloud compute backends
// The session manager only talks to this trait; AWS is the one backend today

pub mod aws;
pub mod ssh;

pub use aws::{AwsInstanceProvider, AwsSettings};
pub use ssh::SshTarget;

use crate::models::{InstanceHandle, KeyPairInfo, StateChange};
use crate::process::ProcessError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No instance found for {0}")]
    NotFound(String),
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),
    #[error("Instance {instance_id} is not running (state: {state})")]
    NotRunning { instance_id: String, state: String },
    #[error("Instance {0} has no public IP address")]
    IpUnresolved(String),
    #[error("SSH key already exists at {0}")]
    KeyExists(PathBuf),
    #[error("SSH key not found at {0}")]
    KeyMissing(PathBuf),
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
    #[error("Provider command failed: {0}")]
    Process(#[from] ProcessError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle verbs for the single compute instance backing a project
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Login user on the instance
    fn username(&self) -> String;

    /// Generate and register a key pair, writing the private key to `key_path`
    async fn create_keypair(&self, key_path: &Path) -> Result<KeyPairInfo, ProviderError>;

    async fn create_instance(&self, key_path: &Path) -> Result<InstanceHandle, ProviderError>;

    async fn describe(&self) -> Result<InstanceHandle, ProviderError>;

    async fn start_instance(&self) -> Result<StateChange, ProviderError>;

    async fn stop_instance(&self) -> Result<StateChange, ProviderError>;

    async fn delete_instance(&self) -> Result<StateChange, ProviderError>;

    async fn enable_termination_protection(&self) -> Result<(), ProviderError>;

    async fn disable_termination_protection(&self) -> Result<(), ProviderError>;

    async fn is_termination_protection_enabled(&self) -> Result<bool, ProviderError>;

    /// Current public IP; fails unless the instance is running
    async fn get_ip(&self) -> Result<String, ProviderError> {
        let handle = self.describe().await?;
        if !handle.state.is_running() {
            return Err(ProviderError::NotRunning {
                instance_id: handle.instance_id,
                state: handle.state.to_string(),
            });
        }
        handle
            .public_ip
            .ok_or(ProviderError::IpUnresolved(handle.instance_id))
    }

    /// Interactive ssh session, or one command with an attached terminal
    async fn ssh_connect(
        &self,
        key_path: &Path,
        command: Option<String>,
        options: Vec<String>,
    ) -> Result<(), ProviderError>;

    /// Run one command on the instance and fail on non-zero exit
    async fn ssh_run(&self, key_path: &Path, command: &str) -> Result<(), ProviderError>;
}
