// ABOUTME: Error type for session manager operations
// Wraps every lower layer so the CLI has one type to report and map to exit codes

use crate::config::ConfigError;
use crate::probe::ProbeError;
use crate::process::ProcessError;
use crate::provider::ProviderError;
use crate::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Command error: {0}")]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Connectivity error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Termination protection is enabled for {0}; disable it before deleting")]
    Protected(String),
}

impl SessionError {
    /// True when a foreground child stopped because perry received SIGINT/SIGTERM
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Process(err) => err.is_interrupted(),
            Self::Sync(err) => err.is_interrupted(),
            Self::Provider(ProviderError::Process(err)) => err.is_interrupted(),
            _ => false,
        }
    }

    /// Exit code of the failed child process, if that is what failed
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Process(err) | Self::Provider(ProviderError::Process(err)) => err.exit_code(),
            Self::Sync(SyncError::Unison { source, .. }) => source.exit_code(),
            Self::Sync(SyncError::Remote {
                source: ProviderError::Process(err),
                ..
            }) => err.exit_code(),
            _ => None,
        }
    }
}
