// ABOUTME: Project code derivation and the resource names derived from it
// The code is used unescaped in socket paths, context names and shell commands

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

use super::ConfigError;

pub const PROJECT_SUFFIX: &str = "perry";
pub const SCOPE_MARKER: &str = "s";
pub const SEPARATOR: &str = "-";

lazy_static! {
    static ref SAFE_CODE: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("project code pattern is valid");
}

/// Namespaced identifier shared by every resource of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectCode(String);

impl ProjectCode {
    /// `<env_label>-s[-<project_id>]-perry`
    pub fn derive(env_label: &str, project_id: Option<&str>) -> Result<Self, ConfigError> {
        let mut parts = vec![env_label, SCOPE_MARKER];
        parts.extend(project_id);
        parts.push(PROJECT_SUFFIX);
        Self::parse(&parts.join(SEPARATOR))
    }

    pub fn parse(code: &str) -> Result<Self, ConfigError> {
        if SAFE_CODE.is_match(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(ConfigError::UnsafeProjectCode(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local (and forwarded) container runtime socket
    pub fn socket_path(&self) -> String {
        format!("/var/run/{}.sock", self.0)
    }

    pub fn context_name(&self) -> &str {
        &self.0
    }

    pub fn keypair_name(&self) -> String {
        format!("{}-keypair", self.0)
    }

    pub fn service_name(&self) -> String {
        format!("{}-ec2-agent", self.0)
    }

    pub fn key_file_name(&self) -> String {
        format!("id_rsa_{}", self.0.replace(SEPARATOR, "_"))
    }

    pub fn default_key_path(&self, home: &Path) -> PathBuf {
        home.join(".ssh").join(self.key_file_name())
    }
}

impl fmt::Display for ProjectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_ordering() {
        let code = ProjectCode::derive("ci", Some("alpha")).unwrap();
        assert_eq!(code.as_str(), "ci-s-alpha-perry");

        let code = ProjectCode::derive("dave", None).unwrap();
        assert_eq!(code.as_str(), "dave-s-perry");
    }

    #[test]
    fn test_derived_names() {
        let code = ProjectCode::derive("ci", Some("alpha")).unwrap();

        assert_eq!(code.socket_path(), "/var/run/ci-s-alpha-perry.sock");
        assert_eq!(code.context_name(), "ci-s-alpha-perry");
        assert_eq!(code.keypair_name(), "ci-s-alpha-perry-keypair");
        assert_eq!(code.service_name(), "ci-s-alpha-perry-ec2-agent");
        assert_eq!(
            code.default_key_path(Path::new("/home/ci")),
            PathBuf::from("/home/ci/.ssh/id_rsa_ci_s_alpha_perry")
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = ProjectCode::derive("ci", Some("alpha")).unwrap();
        let b = ProjectCode::derive("ci", Some("alpha")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key_file_name(), b.key_file_name());
    }

    #[test]
    fn test_rejects_shell_unsafe_codes() {
        for bad in ["", "-leading", "has space", "semi;colon", "dollar$", "slash/x", "quote'"] {
            assert!(ProjectCode::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(ProjectCode::derive("ci", Some("a b")).is_err());
        assert!(ProjectCode::parse("ok_name.1-x").is_ok());
    }
}
