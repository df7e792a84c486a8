// ABOUTME: Configuration loading for perry (YAML or TOML) and the values derived from it
// The config is read once per invocation and never mutated afterwards

pub mod project;

pub use project::ProjectCode;

use crate::models::PortForwardMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "./perry_config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Unsupported config format: {0} (expected .yml, .yaml or .toml)")]
    UnsupportedFormat(PathBuf),
    #[error("Project code {0:?} is empty or not filesystem/shell safe")]
    UnsafeProjectCode(String),
    #[error("Could not determine the current user: {0}")]
    UnknownUser(String),
    #[error("Could not determine the home directory")]
    NoHomeDir,
    #[error("Sync path {path} is outside the sync root {root}")]
    SyncPathOutsideRoot { path: PathBuf, root: PathBuf },
}

/// Everything needed to manage one remote Docker host
#[derive(Debug, Clone, Deserialize)]
pub struct PerryConfig {
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default = "default_profile")]
    pub credentials_profile_name: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default)]
    pub instance_ami: Option<String>,
    /// Root volume size in GiB
    #[serde(default = "default_volume_size")]
    pub volume_size: u32,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,
    /// Falls back to the OS login user
    #[serde(default)]
    pub env_label: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub key_path: Option<String>,

    #[serde(default = "default_sync_root")]
    pub sync_root: String,
    #[serde(default)]
    pub sync_paths: Vec<String>,
    #[serde(default)]
    pub ignore_dirs: Vec<String>,
    #[serde(default = "default_true")]
    pub initial_push: bool,

    #[serde(default)]
    pub local_port_forwards: PortForwardMap,
    #[serde(default)]
    pub remote_port_forwards: PortForwardMap,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_instance_type() -> String {
    "t3.medium".to_string()
}

fn default_volume_size() -> u32 {
    30
}

fn default_bind_address() -> String {
    "localhost".to_string()
}

fn default_sync_root() -> String {
    "~".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PerryConfig {
    fn default() -> Self {
        Self {
            aws_region: default_region(),
            credentials_profile_name: default_profile(),
            instance_type: default_instance_type(),
            instance_ami: None,
            volume_size: default_volume_size(),
            security_group_ids: Vec::new(),
            subnet_id: None,
            project_id: None,
            env_label: None,
            bind_address: default_bind_address(),
            key_path: None,
            sync_root: default_sync_root(),
            sync_paths: Vec::new(),
            ignore_dirs: Vec::new(),
            initial_push: true,
            local_port_forwards: PortForwardMap::new(),
            remote_port_forwards: PortForwardMap::new(),
        }
    }
}

impl PerryConfig {
    /// Load from a `.yml`/`.yaml` or `.toml` file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yml" | "yaml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn env_label(&self) -> Result<String, ConfigError> {
        match &self.env_label {
            Some(label) => Ok(label.clone()),
            None => current_username(),
        }
    }

    pub fn project_code(&self) -> Result<ProjectCode, ConfigError> {
        ProjectCode::derive(&self.env_label()?, self.project_id.as_deref())
    }

    /// Explicit `key_path`, or `~/.ssh/id_rsa_<code with underscores>`
    pub fn key_path(&self, code: &ProjectCode) -> Result<PathBuf, ConfigError> {
        match &self.key_path {
            Some(path) => expand_home(path),
            None => Ok(code.default_key_path(&home_dir()?)),
        }
    }

    pub fn sync_root(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.sync_root)
    }

    /// `sync_paths` made relative to the sync root. The root itself is dropped
    /// since syncing the whole root is already the default.
    pub fn relative_sync_paths(&self, root: &Path) -> Result<Vec<String>, ConfigError> {
        let mut relative = Vec::with_capacity(self.sync_paths.len());
        for raw in &self.sync_paths {
            let expanded = expand_home(raw)?;
            let absolute = if expanded.is_absolute() {
                expanded
            } else {
                root.join(expanded)
            };
            let rel = absolute
                .strip_prefix(root)
                .map_err(|_| ConfigError::SyncPathOutsideRoot {
                    path: absolute.clone(),
                    root: root.to_path_buf(),
                })?;
            if rel.as_os_str().is_empty() {
                debug!("Sync path {} is the sync root, ignoring", raw);
                continue;
            }
            relative.push(rel.to_string_lossy().into_owned());
        }
        Ok(relative)
    }
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::NoHomeDir)
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> Result<PathBuf, ConfigError> {
    if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        Ok(home_dir()?.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Login name of the invoking user
pub fn current_username() -> Result<String, ConfigError> {
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => std::env::var("USER")
            .map_err(|_| ConfigError::UnknownUser("no passwd entry and USER is unset".to_string())),
        Err(e) => Err(ConfigError::UnknownUser(e.to_string())),
    }
}
