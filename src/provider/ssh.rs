// ABOUTME: Plain ssh invocations against a provisioned instance

use crate::process::CommandSpec;
use std::path::Path;

/// `user@host` plus the identity used to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget<'a> {
    pub username: &'a str,
    pub host: &'a str,
    pub key_path: &'a Path,
}

impl<'a> SshTarget<'a> {
    pub fn new(username: &'a str, host: &'a str, key_path: &'a Path) -> Self {
        Self {
            username,
            host,
            key_path,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// `ssh -i <key> -o StrictHostKeyChecking=no [options] user@host [command]`
    pub fn command(&self, options: &[String], remote_command: Option<&str>) -> CommandSpec {
        CommandSpec::new("ssh")
            .arg("-i")
            .arg(self.key_path.to_string_lossy())
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(options.iter().cloned())
            .arg(self.destination())
            .args(remote_command)
    }
}
