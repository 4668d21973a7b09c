use assert_cmd::Command;
use dsrgraph::core::execution::{
    ActionType, FileTaskStore, Policy, PrivacyRequest, RequestTask, TaskStore,
};
use predicates::prelude::*;
use serde_json::{json, Map};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SHOP: &str = r#"
datasets:
  - name: shop
    connection_key: shop_db
    collections:
      - name: customer
        fields:
          - name: email
            identity: email
          - name: id
            data_type: integer
      - name: orders
        fields:
          - name: customer_id
            data_type: integer
            references:
              - field: shop.customer.id
                direction: from
"#;

const ISOLATED: &str = r#"
datasets:
  - name: shop
    connection_key: shop_db
    collections:
      - name: customer
        fields:
          - name: email
            identity: email
      - name: archive
        fields:
          - name: blob
"#;

const AFTER_CYCLE: &str = r#"
datasets:
  - name: a
    connection_key: db
    collections:
      - name: one
        after: [a.two]
        fields:
          - name: email
            identity: email
      - name: two
        after: [a.one]
        fields:
          - name: email
            identity: email
"#;

fn workspace_with(yaml: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let datasets = temp_dir.path().join("datasets.yaml");
    fs::write(&datasets, yaml).unwrap();
    (temp_dir, datasets)
}

fn dsrgraph(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dsrgraph").unwrap();
    cmd.current_dir(workspace)
        .env("DSRGRAPH_BATCH", "1")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let temp_dir = TempDir::new().unwrap();
    dsrgraph(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("lint"))
        .stdout(predicate::str::contains("dot"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_validate_prints_visit_order() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    dsrgraph(temp_dir.path())
        .arg("validate")
        .arg(&datasets)
        .arg("--identity")
        .arg("email=a@b.com")
        .assert()
        .success()
        .stdout(predicate::str::contains("Datasets: shop"))
        .stdout(predicate::str::contains("1. __ROOT__:__ROOT__"))
        .stdout(predicate::str::contains("2. shop.customer"))
        .stdout(predicate::str::contains("3. shop.orders"))
        .stdout(predicate::str::contains("Terminal collections:\n  - shop.orders"));
}

#[test]
fn test_validate_json_without_identity_seeds_declared_keys() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    let output = dsrgraph(temp_dir.path())
        .arg("validate")
        .arg(&datasets)
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["datasets"], json!(["shop"]));
    assert_eq!(
        payload["visit_order"],
        json!(["__ROOT__:__ROOT__", "shop.customer", "shop.orders"])
    );
    assert_eq!(payload["end_nodes"], json!(["shop.orders"]));
    assert_eq!(payload["hash"].as_str().unwrap().len(), 64);
}

#[test]
fn test_validate_reports_unreachable_collections() {
    let (temp_dir, datasets) = workspace_with(ISOLATED);
    dsrgraph(temp_dir.path())
        .arg("validate")
        .arg(&datasets)
        .assert()
        .failure()
        .stderr(predicate::str::contains("DSR-TRAV-002"))
        .stderr(predicate::str::contains("shop.archive"));
}

#[test]
fn test_validate_rejects_malformed_identity_flag() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    dsrgraph(temp_dir.path())
        .arg("validate")
        .arg(&datasets)
        .arg("--identity")
        .arg("email")
        .assert()
        .failure()
        .stderr(predicate::str::contains("key=value"));
}

#[test]
fn test_lint_clean_graph_succeeds() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    dsrgraph(temp_dir.path())
        .arg("lint")
        .arg(&datasets)
        .assert()
        .success()
        .stdout(predicate::str::contains("No lint findings"));
}

#[test]
fn test_lint_exits_non_zero_on_after_cycle() {
    let (temp_dir, datasets) = workspace_with(AFTER_CYCLE);
    dsrgraph(temp_dir.path())
        .arg("lint")
        .arg(&datasets)
        .assert()
        .failure()
        .stdout(predicate::str::contains("[Error] DSR-LINT-002 a.one"));
}

#[test]
fn test_dot_writes_graph_to_file() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    let out = temp_dir.path().join("graph.dot");
    dsrgraph(temp_dir.path())
        .arg("dot")
        .arg(&datasets)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let dot = fs::read_to_string(&out).unwrap();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("shop.customer"));
    assert!(dot.contains("id -> customer_id"));
}

#[test]
fn test_dot_with_identity_renders_traversal() {
    let (temp_dir, datasets) = workspace_with(SHOP);
    dsrgraph(temp_dir.path())
        .arg("dot")
        .arg(&datasets)
        .arg("--identity")
        .arg("email=a@b.com")
        .assert()
        .success()
        .stdout(predicate::str::contains("__TERMINATE__"));
}

#[test]
fn test_status_for_unknown_request_fails() {
    let temp_dir = TempDir::new().unwrap();
    dsrgraph(temp_dir.path())
        .arg("status")
        .arg("missing-request")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DSR-STORE-001"));
}

#[tokio::test]
async fn test_status_shows_tasks_and_redacted_rows() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileTaskStore::new(temp_dir.path().join(".dsrgraph/state"));
    let identity: Map<_, _> = json!({"email": "a@b.com"}).as_object().cloned().unwrap();
    let request = PrivacyRequest::new(identity, Policy::new("default"), [ActionType::Access])
        .with_id("req-cli");
    store.save_request(&request).await.unwrap();
    let mut task = RequestTask::new(
        "req-cli",
        ActionType::Access,
        "shop.customer".parse().unwrap(),
        1,
    );
    task.access_data = vec![json!({"email": "a@b.com", "api_token": "s3cret"})];
    store.save_task(&task).await.unwrap();

    dsrgraph(temp_dir.path())
        .arg("status")
        .arg("req-cli")
        .arg("--show-data")
        .assert()
        .success()
        .stdout(predicate::str::contains("Request: req-cli"))
        .stdout(predicate::str::contains("Status: pending"))
        .stdout(predicate::str::contains("access:shop.customer"))
        .stdout(predicate::str::contains("[REDACTED]"))
        .stdout(predicate::str::contains("s3cret").not());
}

#[test]
fn test_status_rejects_unsafe_request_id() {
    let temp_dir = TempDir::new().unwrap();
    dsrgraph(temp_dir.path())
        .arg("status")
        .arg("../etc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DSR-STORE-004"));
}
