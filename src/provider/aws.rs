// ABOUTME: AWS EC2 backend for InstanceProvider, driven through the aws CLI
// Instances are located by their Name tag; nothing about them is cached locally

use super::{InstanceProvider, ProviderError, SshTarget};
use crate::models::{InstanceHandle, InstanceState, KeyPairInfo, StateChange};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INSTANCE_USERNAME: &str = "ubuntu";
pub const PROJECT_TAG: &str = "perry:project";
const UBUNTU_AMI_PARAMETER: &str =
    "/aws/service/canonical/ubuntu/server/22.04/stable/current/amd64/hvm/ebs-gp2/ami-id";
const LIVE_STATES: &str = "pending,running,stopping,stopped";
const INSTANCE_QUERY: &str =
    "Reservations[].Instances[].{InstanceId: InstanceId, State: State.Name, PublicIp: PublicIpAddress}";

const USER_DATA: &str = r"#!/bin/bash
set -euo pipefail
export DEBIAN_FRONTEND=noninteractive
apt-get update
apt-get install -y docker.io unison
usermod -aG docker ubuntu
systemctl enable --now docker
";

/// Sizing, placement and naming for the EC2 instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    pub profile: String,
    pub instance_type: String,
    pub ami: Option<String>,
    pub volume_size: u32,
    pub security_group_ids: Vec<String>,
    pub subnet_id: Option<String>,
    pub keypair_name: String,
    pub service_name: String,
    pub project_code: String,
}

/// One row of the describe-instances projection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceRow {
    instance_id: String,
    state: String,
    public_ip: Option<String>,
}

/// One row of a start/stop/terminate projection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateRow {
    instance_id: String,
    previous: String,
    current: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyPairResponse {
    key_name: String,
    #[serde(default)]
    key_fingerprint: Option<String>,
    key_material: String,
}

impl From<InstanceRow> for InstanceHandle {
    fn from(row: InstanceRow) -> Self {
        Self {
            instance_id: row.instance_id,
            state: InstanceState::from_provider(&row.state),
            public_ip: row.public_ip,
        }
    }
}

impl From<StateRow> for StateChange {
    fn from(row: StateRow) -> Self {
        Self {
            instance_id: row.instance_id,
            previous: InstanceState::from_provider(&row.previous),
            current: InstanceState::from_provider(&row.current),
        }
    }
}

pub struct AwsInstanceProvider {
    settings: AwsSettings,
    runner: Arc<dyn CommandRunner>,
}

impl AwsInstanceProvider {
    pub fn new(settings: AwsSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn aws(&self, service: &str, operation: &str) -> CommandSpec {
        CommandSpec::new("aws").args([
            service,
            operation,
            "--region",
            self.settings.region.as_str(),
            "--profile",
            self.settings.profile.as_str(),
        ])
    }

    /// Operation whose output is narrowed by a JMESPath `query`
    fn aws_query(&self, service: &str, operation: &str, query: &str, output: &str) -> CommandSpec {
        self.aws(service, operation)
            .args(["--query", query, "--output", output])
    }

    async fn call<T: DeserializeOwned>(&self, command: &CommandSpec) -> Result<T, ProviderError> {
        let stdout = self.runner.output(command).await?;
        serde_json::from_str(&stdout).map_err(|e| {
            ProviderError::InvalidResponse(format!("{} {}: {}", command.args[0], command.args[1], e))
        })
    }

    /// Single scalar from a `--output text` query
    async fn text(&self, command: &CommandSpec) -> Result<String, ProviderError> {
        let value = self.runner.output(command).await?.trim().to_string();
        if value.is_empty() || value == "None" {
            return Err(ProviderError::InvalidResponse(format!(
                "{} {} returned nothing",
                command.args[0], command.args[1]
            )));
        }
        Ok(value)
    }

    async fn resolve_ami(&self) -> Result<String, ProviderError> {
        if let Some(ami) = &self.settings.ami {
            return Ok(ami.clone());
        }
        debug!("Resolving AMI from {}", UBUNTU_AMI_PARAMETER);
        let cmd = self
            .aws_query("ssm", "get-parameter", "Parameter.Value", "text")
            .args(["--name", UBUNTU_AMI_PARAMETER]);
        self.text(&cmd).await
    }

    fn run_instances_command(&self, ami: &str) -> CommandSpec {
        let block_devices = format!(
            "DeviceName=/dev/sda1,Ebs={{VolumeSize={},VolumeType=gp3,DeleteOnTermination=true}}",
            self.settings.volume_size
        );
        let tags = format!(
            "ResourceType=instance,Tags=[{{Key=Name,Value={}}},{{Key={},Value={}}}]",
            self.settings.service_name, PROJECT_TAG, self.settings.project_code
        );

        let mut cmd = self
            .aws_query("ec2", "run-instances", "Instances[0].InstanceId", "text")
            .args([
                "--image-id",
                ami,
                "--instance-type",
                self.settings.instance_type.as_str(),
                "--key-name",
                self.settings.keypair_name.as_str(),
                "--count",
                "1",
                "--block-device-mappings",
                block_devices.as_str(),
                "--tag-specifications",
                tags.as_str(),
                "--user-data",
                USER_DATA,
            ]);
        if let Some(subnet) = &self.settings.subnet_id {
            cmd = cmd.args(["--subnet-id", subnet.as_str()]);
        }
        if !self.settings.security_group_ids.is_empty() {
            cmd = cmd
                .arg("--security-group-ids")
                .args(self.settings.security_group_ids.iter().cloned());
        }
        cmd
    }

    async fn wait_running(&self, instance_id: &str) -> Result<(), ProviderError> {
        info!("Waiting for instance {} to reach running state", instance_id);
        let cmd = self
            .aws("ec2", "wait")
            .args(["instance-running", "--instance-ids", instance_id]);
        self.runner.run(&cmd).await?;
        Ok(())
    }

    /// `operation` reports its changes under `changes_key`, e.g. `StoppingInstances`
    async fn change_state(&self, operation: &str, changes_key: &str) -> Result<StateChange, ProviderError> {
        let instance = self.describe().await?;
        let query = format!(
            "{changes_key}[].{{InstanceId: InstanceId, Previous: PreviousState.Name, Current: CurrentState.Name}}"
        );
        let cmd = self
            .aws_query("ec2", operation, &query, "json")
            .args(["--instance-ids", instance.instance_id.as_str()]);
        let rows: Vec<StateRow> = self.call(&cmd).await?;
        rows.into_iter()
            .next()
            .map(StateChange::from)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{operation} returned no instances")))
    }

    async fn set_termination_protection(&self, enabled: bool) -> Result<(), ProviderError> {
        let instance = self.describe().await?;
        let flag = if enabled {
            "--disable-api-termination"
        } else {
            "--no-disable-api-termination"
        };
        let cmd = self
            .aws("ec2", "modify-instance-attribute")
            .args(["--instance-id", instance.instance_id.as_str(), flag]);
        self.runner.run(&cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceProvider for AwsInstanceProvider {
    fn username(&self) -> String {
        INSTANCE_USERNAME.to_string()
    }

    async fn create_keypair(&self, key_path: &Path) -> Result<KeyPairInfo, ProviderError> {
        if key_path.exists() {
            return Err(ProviderError::KeyExists(key_path.to_path_buf()));
        }

        let cmd = self.aws("ec2", "create-key-pair").args([
            "--key-name",
            self.settings.keypair_name.as_str(),
            "--key-type",
            "rsa",
            "--output",
            "json",
        ]);
        let response: CreateKeyPairResponse = self.call(&cmd).await?;

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)?;
        file.write_all(response.key_material.as_bytes())?;
        if !response.key_material.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        info!("Wrote private key for {} to {}", response.key_name, key_path.display());

        Ok(KeyPairInfo {
            name: response.key_name,
            fingerprint: response.key_fingerprint,
            key_path: key_path.to_path_buf(),
        })
    }

    async fn create_instance(&self, key_path: &Path) -> Result<InstanceHandle, ProviderError> {
        if !key_path.exists() {
            return Err(ProviderError::KeyMissing(key_path.to_path_buf()));
        }
        match self.describe().await {
            Ok(existing) => {
                return Err(ProviderError::AlreadyExists(format!(
                    "{} ({})",
                    self.settings.service_name, existing.instance_id
                )))
            }
            Err(ProviderError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let ami = self.resolve_ami().await?;
        let instance_id = self.text(&self.run_instances_command(&ami)).await?;
        info!("Launched instance {}", instance_id);

        self.wait_running(&instance_id).await?;
        self.describe().await
    }

    async fn describe(&self) -> Result<InstanceHandle, ProviderError> {
        let cmd = self
            .aws_query("ec2", "describe-instances", INSTANCE_QUERY, "json")
            .args([
                "--filters",
                format!("Name=tag:Name,Values={}", self.settings.service_name).as_str(),
                format!("Name=instance-state-name,Values={LIVE_STATES}").as_str(),
            ]);
        let mut rows: Vec<InstanceRow> = self.call(&cmd).await?;

        if rows.len() > 1 {
            warn!(
                "{} instances tagged {}, using the first",
                rows.len(),
                self.settings.service_name
            );
        }
        if rows.is_empty() {
            return Err(ProviderError::NotFound(self.settings.service_name.clone()));
        }
        Ok(rows.swap_remove(0).into())
    }

    async fn start_instance(&self) -> Result<StateChange, ProviderError> {
        let change = self.change_state("start-instances", "StartingInstances").await?;
        self.wait_running(&change.instance_id).await?;
        Ok(change)
    }

    async fn stop_instance(&self) -> Result<StateChange, ProviderError> {
        self.change_state("stop-instances", "StoppingInstances").await
    }

    async fn delete_instance(&self) -> Result<StateChange, ProviderError> {
        self.change_state("terminate-instances", "TerminatingInstances")
            .await
    }

    async fn enable_termination_protection(&self) -> Result<(), ProviderError> {
        self.set_termination_protection(true).await
    }

    async fn disable_termination_protection(&self) -> Result<(), ProviderError> {
        self.set_termination_protection(false).await
    }

    async fn is_termination_protection_enabled(&self) -> Result<bool, ProviderError> {
        let instance = self.describe().await?;
        let cmd = self
            .aws_query(
                "ec2",
                "describe-instance-attribute",
                "DisableApiTermination.Value",
                "text",
            )
            .args([
                "--instance-id",
                instance.instance_id.as_str(),
                "--attribute",
                "disableApiTermination",
            ]);
        Ok(self.text(&cmd).await?.eq_ignore_ascii_case("true"))
    }

    async fn ssh_connect(
        &self,
        key_path: &Path,
        command: Option<String>,
        options: Vec<String>,
    ) -> Result<(), ProviderError> {
        let ip = self.get_ip().await?;
        let target = SshTarget::new(INSTANCE_USERNAME, &ip, key_path);
        self.runner
            .run(&target.command(&options, command.as_deref()))
            .await?;
        Ok(())
    }

    async fn ssh_run(&self, key_path: &Path, command: &str) -> Result<(), ProviderError> {
        let ip = self.get_ip().await?;
        let target = SshTarget::new(INSTANCE_USERNAME, &ip, key_path);
        self.runner.run(&target.command(&[], Some(command))).await?;
        Ok(())
    }
}
