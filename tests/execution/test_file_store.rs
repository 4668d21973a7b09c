use async_trait::async_trait;
use dsrgraph::core::config::EngineConfig;
use dsrgraph::core::execution::{
    ActionType, Connector, ConnectorRegistry, ExecutionPlan, FileTaskStore, NodeOutcome, Policy,
    PrivacyRequest, RequestContext, RequestRunner, RequestStatus, RequestTask, Row, TaskStatus,
    TaskStore,
};
use dsrgraph::core::graph::schema::DatasetDocument;
use dsrgraph::core::graph::{DatasetGraph, InputData, Traversal, TraversalNode};
use dsrgraph::core::types::ErrorCategory;
use serde_json::{json, Map, Value};
use std::sync::Arc;
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

struct ShopConnector;

#[async_trait]
impl Connector for ShopConnector {
    fn key(&self) -> &str {
        "shop_db"
    }

    async fn retrieve_data(
        &self,
        node: &TraversalNode,
        _policy: &Policy,
        _ctx: &RequestContext,
        input: &InputData,
    ) -> NodeOutcome<Vec<Row>> {
        let rows = match node.address.collection.as_str() {
            "customer" => vec![json!({"email": "a@b.com", "id": 3, "api_token": "tok"})],
            "orders" if input.get("customer_id") == Some(&vec![json!(3)]) => {
                vec![json!({"customer_id": 3, "total": 12.5})]
            }
            _ => vec![],
        };
        NodeOutcome::Completed(
            rows.into_iter()
                .filter_map(|row| row.as_object().cloned())
                .collect(),
        )
    }

    async fn mask_data(
        &self,
        _node: &TraversalNode,
        _policy: &Policy,
        _ctx: &RequestContext,
        rows: &[Row],
        _input: &InputData,
    ) -> NodeOutcome<u64> {
        NodeOutcome::Completed(rows.len() as u64)
    }
}

fn identity() -> Map<String, Value> {
    json!({"email": "a@b.com"}).as_object().cloned().unwrap()
}

fn shop_traversal() -> Arc<Traversal> {
    let doc: DatasetDocument = serde_yaml::from_str(SHOP).unwrap();
    let graph = Arc::new(DatasetGraph::new(&doc.datasets).unwrap());
    Arc::new(Traversal::new(graph, identity()).unwrap())
}

#[tokio::test]
async fn requests_and_tasks_survive_a_new_store_instance() {
    let dir = TempDir::new().unwrap();
    let request = PrivacyRequest::new(identity(), Policy::new("default"), [ActionType::Access])
        .with_id("req-1");
    let mut task = RequestTask::new(
        "req-1",
        ActionType::Access,
        "shop.customer".parse().unwrap(),
        1,
    );
    task.access_data = vec![json!({"id": 1})];

    {
        let store = FileTaskStore::new(dir.path());
        store.save_request(&request).await.unwrap();
        store.save_task(&task).await.unwrap();
    }

    let reopened = FileTaskStore::new(dir.path());
    let loaded = reopened.load_request("req-1").await.unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.policy.key, "default");
    let tasks = reopened.list_tasks("req-1").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "access:shop.customer");
    assert_eq!(tasks[0].access_data, vec![json!({"id": 1})]);
    assert_eq!(reopened.list_requests().unwrap(), vec!["req-1".to_string()]);
}

#[tokio::test]
async fn stale_writes_conflict() {
    let dir = TempDir::new().unwrap();
    let store = FileTaskStore::new(dir.path());
    let task = RequestTask::new("req-2", ActionType::Access, "shop.orders".parse().unwrap(), 1);
    let saved = store.save_task(&task).await.unwrap();

    let mut winner = saved.clone();
    winner.status = TaskStatus::InProgress;
    store.save_task(&winner).await.unwrap();

    let mut loser = saved;
    loser.status = TaskStatus::Skipped;
    let err = store.save_task(&loser).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ConflictError);
    assert_eq!(err.code, "DSR-STORE-002");

    let loaded = store.load_task("req-2", "access:shop.orders").await.unwrap();
    assert_eq!(loaded.status, TaskStatus::InProgress);
    assert_eq!(loaded.version, 2);
}

#[tokio::test]
async fn unsafe_request_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = FileTaskStore::new(dir.path());
    for id in ["", "../escape", "a/b", "with space"] {
        let err = store.load_request(id).await.unwrap_err();
        assert_eq!(err.code, "DSR-STORE-004", "id {:?}", id);
    }
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let dir = TempDir::new().unwrap();
    let store = FileTaskStore::new(dir.path());
    let err = store.load_request("nope").await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::NotFoundError);
    assert_eq!(err.code, "DSR-STORE-001");
    assert!(store.list_tasks("nope").await.unwrap().is_empty());
    assert!(store.list_requests().unwrap().is_empty());
}

#[tokio::test]
async fn erasure_request_runs_end_to_end_on_disk() {
    let dir = TempDir::new().unwrap();
    let traversal = shop_traversal();
    let store = Arc::new(FileTaskStore::new(dir.path()));
    let mut registry = ConnectorRegistry::builder();
    registry.register(ShopConnector);
    let runner = RequestRunner::new(
        traversal.clone(),
        store.clone(),
        registry.build(),
        EngineConfig::default(),
    );

    let request = PrivacyRequest::new(identity(), Policy::new("erase"), [ActionType::Erasure])
        .with_id("req-e2e");
    let id = runner
        .start(ExecutionPlan::build(&traversal, request))
        .await
        .unwrap();
    let report = runner.run(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Complete);

    // A fresh store sees the persisted outcome.
    let reopened = FileTaskStore::new(dir.path());
    let request = reopened.load_request("req-e2e").await.unwrap();
    assert_eq!(request.status, RequestStatus::Complete);
    assert_eq!(
        request.completed_actions,
        vec![ActionType::Access, ActionType::Erasure]
    );
    let orders = reopened
        .load_task("req-e2e", "access:shop.orders")
        .await
        .unwrap();
    assert_eq!(orders.access_data, vec![json!({"customer_id": 3, "total": 12.5})]);
    let masked = reopened
        .load_task("req-e2e", "erasure:shop.orders")
        .await
        .unwrap();
    assert_eq!(masked.rows_masked, Some(1));

    let tasks = reopened.list_tasks("req-e2e").await.unwrap();
    let sequences: Vec<u32> = tasks.iter().map(|t| t.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort();
    assert_eq!(sequences, sorted);
    assert_eq!(tasks.len(), 8);
}
