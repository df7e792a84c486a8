// ABOUTME: Shared fakes for integration tests: a recording command runner and a scripted provider

#![allow(dead_code)]

use async_trait::async_trait;
use perry::config::PerryConfig;
use perry::models::{InstanceHandle, InstanceState, KeyPairInfo, StateChange};
use perry::process::{CommandRunner, CommandSpec, ProcessError};
use perry::provider::{InstanceProvider, ProviderError};
use perry::session::{RemoteSessionManager, SessionSettings};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Run,
    Output,
    Succeeds,
    Supervise,
}

/// Records every command instead of spawning it
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<(Call, CommandSpec)>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<(Call, CommandSpec)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call, command: &CommandSpec) {
        self.calls.lock().unwrap().push((call, command.clone()));
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> Result<(), ProcessError> {
        self.record(Call::Run, command);
        Ok(())
    }

    async fn output(&self, command: &CommandSpec) -> Result<String, ProcessError> {
        self.record(Call::Output, command);
        Ok(String::new())
    }

    async fn succeeds(&self, command: &CommandSpec) -> Result<bool, ProcessError> {
        self.record(Call::Succeeds, command);
        Ok(false)
    }

    async fn supervise(&self, command: &CommandSpec) -> Result<(), ProcessError> {
        self.record(Call::Supervise, command);
        Ok(())
    }
}

/// Running instance whose public IP changes on every lookup
pub struct ScriptedProvider {
    ips: Mutex<VecDeque<String>>,
    remote_commands: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(ips: &[&str]) -> Self {
        Self {
            ips: Mutex::new(ips.iter().map(|ip| ip.to_string()).collect()),
            remote_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn remote_commands(&self) -> Vec<String> {
        self.remote_commands.lock().unwrap().clone()
    }

    fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            instance_id: "i-0123456789".to_string(),
            state: InstanceState::Running,
            public_ip: self.ips.lock().unwrap().pop_front(),
        }
    }

    fn change(&self, current: InstanceState) -> StateChange {
        StateChange {
            instance_id: "i-0123456789".to_string(),
            previous: InstanceState::Running,
            current,
        }
    }
}

#[async_trait]
impl InstanceProvider for ScriptedProvider {
    fn username(&self) -> String {
        "ubuntu".to_string()
    }

    async fn create_keypair(&self, key_path: &Path) -> Result<KeyPairInfo, ProviderError> {
        Err(ProviderError::KeyExists(key_path.to_path_buf()))
    }

    async fn create_instance(&self, _key_path: &Path) -> Result<InstanceHandle, ProviderError> {
        Err(ProviderError::AlreadyExists("i-0123456789".to_string()))
    }

    async fn describe(&self) -> Result<InstanceHandle, ProviderError> {
        Ok(self.handle())
    }

    async fn start_instance(&self) -> Result<StateChange, ProviderError> {
        Ok(self.change(InstanceState::Running))
    }

    async fn stop_instance(&self) -> Result<StateChange, ProviderError> {
        Ok(self.change(InstanceState::Stopping))
    }

    async fn delete_instance(&self) -> Result<StateChange, ProviderError> {
        Ok(self.change(InstanceState::ShuttingDown))
    }

    async fn enable_termination_protection(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn disable_termination_protection(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn is_termination_protection_enabled(&self) -> Result<bool, ProviderError> {
        Ok(false)
    }

    async fn ssh_connect(
        &self,
        _key_path: &Path,
        _command: Option<String>,
        _options: Vec<String>,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn ssh_run(&self, _key_path: &Path, command: &str) -> Result<(), ProviderError> {
        self.remote_commands.lock().unwrap().push(command.to_string());
        Ok(())
    }
}

/// Manager over fakes, built from a YAML config
pub fn manager_from_yaml(
    yaml: &str,
    ips: &[&str],
) -> (RemoteSessionManager, Arc<RecordingRunner>) {
    let config = PerryConfig::from_yaml_str(yaml).unwrap();
    let settings = SessionSettings::from_config(&config).unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let manager = RemoteSessionManager::new(
        Box::new(ScriptedProvider::new(ips)),
        runner.clone(),
        settings,
    );
    (manager, runner)
}
