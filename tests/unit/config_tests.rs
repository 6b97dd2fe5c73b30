//! Unit tests for session configuration and TOML loading.

use std::time::Duration;

use serial_test::serial;

use agent_bridge::config::{ConfigProvider, DEFAULT_QUEUE_CAPACITY};
use agent_bridge::{AppError, BridgeConfig, ProcessConfig, SessionConfig};

fn sample_toml(dir: &str) -> String {
    format!(
        r#"
[process]
command = "claude"
args = ["--output-format", "stream-json"]
passthrough_env = ["ANTHROPIC_API_KEY"]
working_dir = '{dir}'

[process.env]
BRIDGE_MODE = "test"

[session]
max_turns = 5
call_timeout_seconds = 30
queue_capacity = 8

[[policy.rules]]
tool = "Bash"
input_key = "command"
input_pattern = "^rm\\s+-rf"
decision = "deny"
reason = "destructive command"

[[policy.rules]]
tool = "mcp__fs__*"
decision = "allow"

[audit]
log_dir = "audit"
"#
    )
}

// ── SessionConfigBuilder ──────────────────────────────────────────────────────

#[test]
fn builder_applies_every_setting() {
    let config = SessionConfig::builder("claude")
        .arg("--verbose")
        .args(["--output-format", "stream-json"])
        .env("MODE", "x")
        .max_turns(3)
        .call_timeout(Duration::from_secs(9))
        .queue_capacity(4)
        .build()
        .expect("valid config");

    assert_eq!(config.process().command, "claude");
    assert_eq!(
        config.process().args,
        vec!["--verbose", "--output-format", "stream-json"]
    );
    assert_eq!(config.process().env.get("MODE").map(String::as_str), Some("x"));
    assert_eq!(config.max_turns(), Some(3));
    assert_eq!(config.call_timeout(), Some(Duration::from_secs(9)));
    assert_eq!(config.queue_capacity(), 4);
}

#[test]
fn builder_defaults_are_unbounded() {
    let config = SessionConfig::builder("claude").build().expect("valid");
    assert_eq!(config.max_turns(), None);
    assert_eq!(config.call_timeout(), None);
    assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
}

#[test]
fn blank_command_is_rejected() {
    let err = SessionConfig::builder("   ").build().unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("command")));
}

#[test]
fn zero_limits_are_rejected() {
    assert!(matches!(
        SessionConfig::builder("c").queue_capacity(0).build(),
        Err(AppError::Config(_))
    ));
    assert!(matches!(
        SessionConfig::builder("c").max_turns(0).build(),
        Err(AppError::Config(_))
    ));
    assert!(matches!(
        SessionConfig::builder("c").call_timeout(Duration::ZERO).build(),
        Err(AppError::Config(_))
    ));
}

// ── ConfigProvider ────────────────────────────────────────────────────────────

#[test]
#[serial]
fn explicit_env_wins_over_inherited() {
    let mut process = ProcessConfig::new("claude");
    process.env.insert("PATH".into(), "/custom/bin".into());

    let env = process.env();
    let path: Vec<_> = env.iter().filter(|(k, _)| k == "PATH").collect();
    assert_eq!(path.len(), 1, "keys must be unique");
    assert_eq!(path[0].1, "/custom/bin");
}

#[test]
#[serial]
fn passthrough_env_is_copied_when_present() {
    std::env::set_var("AGENT_BRIDGE_TEST_PASSTHROUGH", "copied");
    let mut process = ProcessConfig::new("claude");
    process
        .passthrough_env
        .push("AGENT_BRIDGE_TEST_PASSTHROUGH".into());
    process
        .passthrough_env
        .push("AGENT_BRIDGE_TEST_NEVER_SET".into());

    let env = process.env();
    assert!(env
        .iter()
        .any(|(k, v)| k == "AGENT_BRIDGE_TEST_PASSTHROUGH" && v == "copied"));
    assert!(!env.iter().any(|(k, _)| k == "AGENT_BRIDGE_TEST_NEVER_SET"));
}

#[test]
#[serial]
fn unlisted_variables_are_not_inherited() {
    std::env::set_var("AGENT_BRIDGE_TEST_SECRET", "hidden");
    let env = ProcessConfig::new("claude").env();
    assert!(!env.iter().any(|(k, _)| k == "AGENT_BRIDGE_TEST_SECRET"));
}

// ── BridgeConfig ──────────────────────────────────────────────────────────────

#[test]
fn toml_sections_are_parsed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = sample_toml(&temp.path().display().to_string());
    let config = BridgeConfig::from_toml_str(&raw).expect("valid toml");

    assert_eq!(config.process.command, "claude");
    assert_eq!(config.process.args.len(), 2);
    assert_eq!(
        config.process.env.get("BRIDGE_MODE").map(String::as_str),
        Some("test")
    );
    assert_eq!(config.session.max_turns, Some(5));
    assert_eq!(config.session.call_timeout_seconds, Some(30));
    assert_eq!(config.policy.rules.len(), 2);
    assert_eq!(
        config.audit.as_ref().map(|a| a.log_dir.clone()),
        Some("audit".into())
    );
    assert_eq!(
        config.process.working_dir,
        Some(temp.path().canonicalize().expect("canonical"))
    );

    let session = config.session_config().expect("session config");
    assert_eq!(session.max_turns(), Some(5));
    assert_eq!(session.call_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(session.queue_capacity(), 8);
}

#[test]
fn minimal_toml_uses_defaults() {
    let config = BridgeConfig::from_toml_str("[process]\ncommand = \"claude\"\n").expect("valid");
    assert!(config.policy.rules.is_empty());
    assert!(config.audit.is_none());
    assert_eq!(config.session.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert!(config.policy_chain().expect("chain").is_empty());
}

#[test]
fn policy_chain_preserves_rule_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config =
        BridgeConfig::from_toml_str(&sample_toml(&temp.path().display().to_string())).expect("ok");
    let chain = config.policy_chain().expect("chain");
    assert_eq!(
        chain.names(),
        vec![
            r"deny:Bash:command~^rm\s+-rf".to_owned(),
            "allow:mcp__fs__*".to_owned()
        ]
    );
}

#[test]
fn empty_command_in_toml_is_rejected() {
    let err = BridgeConfig::from_toml_str("[process]\ncommand = \"\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("process.command")));
}

#[test]
fn invalid_rule_is_rejected_at_load() {
    let raw = r#"
[process]
command = "claude"

[[policy.rules]]
tool = "["
decision = "deny"
"#;
    let err = BridgeConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("invalid policy rule")));
}

#[test]
fn missing_working_dir_is_rejected() {
    let raw = "[process]\ncommand = \"claude\"\nworking_dir = \"/definitely/not/here/agent-bridge\"\n";
    let err = BridgeConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("working_dir")));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = BridgeConfig::from_toml_str("[process").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn load_from_missing_path_fails() {
    let err = BridgeConfig::load_from_path("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
