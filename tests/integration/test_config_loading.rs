use dsrgraph::core::config::{ConfigLoader, EngineConfig};
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_dsrgraph_env() {
    for v in &[
        "DSRGRAPH_PARALLEL_LIMIT",
        "DSRGRAPH_NODE_TIMEOUT_MS",
        "DSRGRAPH_RETRY_MAX_ATTEMPTS",
        "DSRGRAPH_STATE_DIR",
    ] {
        env::remove_var(v);
    }
}

/// A workspace without dsrgraph.toml runs on defaults
#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();

    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.execution.parallel_limit, 4);
    assert_eq!(config.execution.retry.max_attempts, 1);
    assert!(config.execution.node_timeout_ms.is_none());
    assert_eq!(config.storage.state_dir, PathBuf::from(".dsrgraph/state"));
    assert!(config.redaction.redact_keys.contains(&"token".to_string()));
}

#[test]
#[serial]
fn test_config_file_sections_are_loaded() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[execution]
parallel_limit = 8
node_timeout_ms = 30000

[execution.retry]
max_attempts = 3
backoff_ms = 250
backoff_multiplier = 2.0
jitter_ms = 50

[storage]
state_dir = "/var/lib/dsrgraph"

[redaction]
redact_keys = ["ssn", "token"]
"#;
    fs::write(workspace_path.join("dsrgraph.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();

    assert_eq!(config.execution.parallel_limit, 8);
    assert_eq!(config.execution.node_timeout_ms, Some(30000));
    assert_eq!(config.execution.retry.max_attempts, 3);
    assert_eq!(config.execution.retry.backoff_ms, 250);
    assert_eq!(config.execution.retry.backoff_multiplier, 2.0);
    assert_eq!(config.execution.retry.jitter_ms, 50);
    assert_eq!(config.redaction.redact_keys, vec!["ssn", "token"]);
    // Absolute state dirs are used as-is.
    assert_eq!(
        config.state_dir(workspace_path),
        PathBuf::from("/var/lib/dsrgraph")
    );
}

#[test]
#[serial]
fn test_partial_config_keeps_defaults_for_missing_keys() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("dsrgraph.toml"),
        "[execution.retry]\nmax_attempts = 5\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(config.execution.retry.max_attempts, 5);
    assert_eq!(config.execution.retry.backoff_multiplier, 1.0);
    assert_eq!(config.execution.parallel_limit, 4);
    assert_eq!(
        config.state_dir(temp_dir.path()),
        temp_dir.path().join(".dsrgraph/state")
    );
}

/// Environment variables take precedence over the config file
#[test]
#[serial]
fn test_env_precedence_integration() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();
    fs::write(
        workspace_path.join("dsrgraph.toml"),
        r#"
[execution]
parallel_limit = 2

[execution.retry]
max_attempts = 2

[storage]
state_dir = "file-state"
"#,
    )
    .unwrap();

    env::set_var("DSRGRAPH_PARALLEL_LIMIT", "16");
    env::set_var("DSRGRAPH_NODE_TIMEOUT_MS", "1500");
    env::set_var("DSRGRAPH_STATE_DIR", "env-state");

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    clear_dsrgraph_env();

    assert_eq!(config.execution.parallel_limit, 16);
    assert_eq!(config.execution.node_timeout_ms, Some(1500));
    // Not overridden, so the file value stands.
    assert_eq!(config.execution.retry.max_attempts, 2);
    assert_eq!(config.storage.state_dir, PathBuf::from("env-state"));
}

#[test]
#[serial]
fn test_unparseable_env_values_are_ignored() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("DSRGRAPH_PARALLEL_LIMIT", "lots");
    env::set_var("DSRGRAPH_STATE_DIR", "   ");

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_dsrgraph_env();

    assert_eq!(config.execution.parallel_limit, 4);
    assert_eq!(config.storage.state_dir, PathBuf::from(".dsrgraph/state"));
}

#[test]
#[serial]
fn test_malformed_config_file_is_rejected() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("dsrgraph.toml"),
        "[execution\nparallel_limit = 2\n",
    )
    .unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "DSR-CONFIG-001");
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("dsrgraph.toml"),
        "[execution.retry]\nbackoff_multiplier = 0.5\n",
    )
    .unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "DSR-CONFIG-002");
    assert!(err.message.contains("backoff_multiplier"));
}

#[test]
#[serial]
fn test_env_override_can_fail_validation() {
    clear_dsrgraph_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("DSRGRAPH_PARALLEL_LIMIT", "0");

    let result = ConfigLoader::load_from_workspace(temp_dir.path());
    clear_dsrgraph_env();

    let err = result.unwrap_err();
    assert_eq!(err.code, "DSR-CONFIG-002");
    assert!(err.message.contains("parallel_limit"));
}
