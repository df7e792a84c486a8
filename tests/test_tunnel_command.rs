// ABOUTME: Tunnel command construction through the public session manager API

mod common;

use common::{manager_from_yaml, Call};
use pretty_assertions::assert_eq;

const WEB_CONFIG: &str = r#"
project_id: alpha
env_label: ci
key_path: /tmp/perry/id_rsa
local_port_forwards:
  web:
    "8080": "80"
remote_port_forwards: {}
"#;

#[tokio::test]
async fn test_local_forward_without_remote_forwards() {
    let (manager, runner) = manager_from_yaml(WEB_CONFIG, &["3.3.3.3"]);

    manager.start_tunnel().await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    let (call, cmd) = &calls[0];
    assert_eq!(*call, Call::Supervise);
    assert_eq!(cmd.program, "sudo");
    assert_eq!(
        cmd.flag_values("-L"),
        vec![
            "/var/run/ci-s-alpha-perry.sock:/var/run/docker.sock",
            "localhost:8080:localhost:80"
        ]
    );
    assert_eq!(cmd.count_flag("-R"), 0);
    assert!(cmd.args.contains(&"ExitOnForwardFailure=yes".to_string()));
    assert!(cmd.args.contains(&"ubuntu@3.3.3.3".to_string()));
}

#[tokio::test]
async fn test_every_mapping_becomes_one_flag() {
    let yaml = r#"
project_id: alpha
env_label: ci
key_path: /tmp/perry/id_rsa
bind_address: 127.0.0.1
local_port_forwards:
  web: {8080: 80, 8443: 443}
  db: {15432: 5432}
remote_port_forwards:
  hooks: {9000: 3000}
"#;
    let (manager, runner) = manager_from_yaml(yaml, &["3.3.3.3"]);

    manager.start_tunnel().await.unwrap();

    let (_, cmd) = &runner.calls()[0];
    let mut locals = cmd.flag_values("-L");
    locals.remove(0);
    locals.sort_unstable();
    assert_eq!(
        locals,
        vec![
            "127.0.0.1:15432:localhost:5432",
            "127.0.0.1:8080:localhost:80",
            "127.0.0.1:8443:localhost:443"
        ]
    );
    assert_eq!(cmd.flag_values("-R"), vec!["0.0.0.0:9000:localhost:3000"]);
}

#[tokio::test]
async fn test_new_ip_after_restart_is_used() {
    let (manager, runner) = manager_from_yaml(WEB_CONFIG, &["3.3.3.3", "4.4.4.4"]);

    manager.start_tunnel().await.unwrap();
    manager.start_tunnel().await.unwrap();

    let calls = runner.calls();
    assert!(calls[0].1.args.contains(&"ubuntu@3.3.3.3".to_string()));
    assert!(calls[1].1.args.contains(&"ubuntu@4.4.4.4".to_string()));
}

#[tokio::test]
async fn test_missing_ip_aborts_before_spawning() {
    let (manager, runner) = manager_from_yaml(WEB_CONFIG, &[]);

    assert!(manager.start_tunnel().await.is_err());
    assert!(runner.calls().is_empty());
}
