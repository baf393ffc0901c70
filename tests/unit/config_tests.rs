use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use ci_connection::config::{ApiConfig, LabelNames};
use ci_connection::{AppError, CiEnvironment, ConnectionConfig};

#[test]
fn empty_document_uses_defaults() {
    let config = ConnectionConfig::from_toml_str("").expect("config parses");

    assert_eq!(config, ConnectionConfig::default());
    assert_eq!(
        config.server_addr(),
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12455)
    );
    assert_eq!(config.initial_timeout(), Duration::from_secs(600));
    assert_eq!(config.reconnect_timeout(), Duration::from_secs(900));
    assert_eq!(config.tick(), Duration::from_secs(60));
    assert_eq!(config.keep_alive(), Duration::from_secs(30));
    assert!(config.state_dir.is_none());
}

#[test]
fn default_label_names() {
    let labels = LabelNames::default();
    assert_eq!(labels.halt_always, "CI Connection Halt - Always");
    assert_eq!(labels.halt_on_retry, "CI Connection Halt - On Retry");
    assert_eq!(labels.halt_on_error, "CI Connection Halt - On Error");
}

#[test]
fn parses_overrides() {
    let toml = r#"
port = 23000
initial_timeout_seconds = 5
reconnect_timeout_seconds = 7
tick_seconds = 1
keep_alive_seconds = 2
state_dir = "/tmp/ci-state"

[labels]
halt_always = "debug-me"

[api]
base_url = "http://localhost:9999"
attempts = 5
"#;

    let config = ConnectionConfig::from_toml_str(toml).expect("config parses");

    assert_eq!(config.port, 23000);
    assert_eq!(config.initial_timeout(), Duration::from_secs(5));
    assert_eq!(config.reconnect_timeout(), Duration::from_secs(7));
    assert_eq!(config.tick(), Duration::from_secs(1));
    assert_eq!(config.keep_alive(), Duration::from_secs(2));
    assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/ci-state")));
    assert_eq!(config.labels.halt_always, "debug-me");
    assert_eq!(config.labels.halt_on_retry, "CI Connection Halt - On Retry");
    assert_eq!(config.api.base_url, "http://localhost:9999");
    assert_eq!(config.api.attempts, 5);
    assert_eq!(config.api.version, "2022-11-28");
}

#[test]
fn rejects_zero_port() {
    let err = ConnectionConfig::from_toml_str("port = 0").expect_err("zero port rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_zero_tick() {
    let err = ConnectionConfig::from_toml_str("tick_seconds = 0").expect_err("zero tick rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_zero_attempts() {
    let toml = "[api]\nattempts = 0\n";
    let err = ConnectionConfig::from_toml_str(toml).expect_err("zero attempts rejected");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_invalid_toml() {
    let err = ConnectionConfig::from_toml_str("port = \"abc\"").expect_err("bad type rejected");
    match err {
        AppError::Config(msg) => assert!(msg.starts_with("invalid config"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn loads_from_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("ci-connection.toml");
    std::fs::write(&path, "port = 4000\n").expect("write config");

    let config = ConnectionConfig::load_or_default(Some(&path)).expect("config loads");
    assert_eq!(config.port, 4000);
}

#[test]
fn missing_file_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("absent.toml");

    let err = ConnectionConfig::load_or_default(Some(&path)).expect_err("missing file");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn no_path_means_defaults() {
    let config = ConnectionConfig::load_or_default(None).expect("defaults");
    assert_eq!(config, ConnectionConfig::default());
}

#[test]
fn ci_environment_reads_known_variables() {
    let env = CiEnvironment::from_vars([
        ("GITHUB_TOKEN", "secret"),
        ("GITHUB_REPOSITORY", "octo/repo"),
        ("GITHUB_REF", "refs/pull/7/merge"),
        ("GITHUB_EVENT_PATH", "/tmp/event.json"),
        ("GITHUB_RUN_ATTEMPT", "2"),
        ("HOME", "/home/runner"),
        ("CONNECTION_POD_NAME", "pod-1"),
        ("UNRELATED", "x"),
    ]);

    assert_eq!(env.token.as_deref(), Some("secret"));
    assert_eq!(env.repository.as_deref(), Some("octo/repo"));
    assert_eq!(env.git_ref.as_deref(), Some("refs/pull/7/merge"));
    assert_eq!(env.event_path, Some(PathBuf::from("/tmp/event.json")));
    assert_eq!(env.run_attempt.as_deref(), Some("2"));
    assert_eq!(env.home, Some(PathBuf::from("/home/runner")));
    assert_eq!(env.pod_name.as_deref(), Some("pod-1"));
    assert!(env.halt_dispatch_input.is_none());
}

#[test]
fn empty_token_counts_as_unset() {
    let env = CiEnvironment::from_vars([("GITHUB_TOKEN", "")]);
    assert!(env.token.is_none());
}

#[test]
fn api_url_variable_overrides_configured_base() {
    let api = ApiConfig::default();

    let env = CiEnvironment::from_vars([("GITHUB_API_URL", "https://ghe.example/api/v3")]);
    assert_eq!(env.api_base_url(&api), "https://ghe.example/api/v3");

    let env = CiEnvironment::from_vars([("GITHUB_API_URL", "")]);
    assert_eq!(env.api_base_url(&api), "https://api.github.com");
}
