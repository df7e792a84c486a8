// ABOUTME: Project code and derived resource names resolved from a config file on disk

use perry::config::{ConfigError, PerryConfig, ProjectCode};
use perry::session::SessionSettings;
use pretty_assertions::assert_eq;
use std::io::Write;

#[test]
fn test_project_code_and_default_key_path() {
    let config = PerryConfig::from_yaml_str("project_id: alpha\nenv_label: ci\n").unwrap();

    let code = config.project_code().unwrap();
    assert_eq!(code.as_str(), "ci-s-alpha-perry");
    assert_eq!(code.socket_path(), "/var/run/ci-s-alpha-perry.sock");
    assert_eq!(code.context_name(), "ci-s-alpha-perry");

    let key_path = config.key_path(&code).unwrap();
    let home = dirs::home_dir().unwrap();
    assert_eq!(key_path, home.join(".ssh").join("id_rsa_ci_s_alpha_perry"));
}

#[test]
fn test_derivation_is_deterministic() {
    let first = ProjectCode::derive("ci", Some("alpha")).unwrap();
    let second = ProjectCode::derive("ci", Some("alpha")).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.key_file_name(), second.key_file_name());
}

#[test]
fn test_unsafe_label_is_rejected_before_any_operation() {
    let config = PerryConfig::from_yaml_str("project_id: alpha\nenv_label: 'a b;rm'\n").unwrap();

    assert!(matches!(
        SessionSettings::from_config(&config),
        Err(perry::session::SessionError::Config(
            ConfigError::UnsafeProjectCode(_)
        ))
    ));
}

#[test]
fn test_toml_config_resolves_same_names() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "project_id = \"alpha\"\nenv_label = \"ci\"\nkey_path = \"/tmp/k\"\n\n[local_port_forwards.web]\n8080 = 80"
    )
    .unwrap();

    let config = PerryConfig::load(file.path()).unwrap();
    let settings = SessionSettings::from_config(&config).unwrap();

    assert_eq!(settings.project_code.as_str(), "ci-s-alpha-perry");
    assert_eq!(settings.forwards.local_forwards(), vec!["localhost:8080:localhost:80"]);
}
