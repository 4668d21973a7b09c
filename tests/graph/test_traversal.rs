use dsrgraph::core::graph::schema::DatasetDocument;
use dsrgraph::core::graph::{CollectionAddress, Dataset, DatasetGraph, FieldPath, Traversal};
use dsrgraph::core::ErrorCategory;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const FOO_BAR: &str = r#"
datasets:
  - name: ds
    connection_key: ds_conn
    collections:
      - name: foo
        fields:
          - name: email
            identity: email
            data_type: string
          - name: id
            data_type: integer
      - name: bar
        fields:
          - name: foo_id
            data_type: integer
            references:
              - field: ds.foo.id
                direction: from
"#;

const AFTER_ONLY: &str = r#"
datasets:
  - name: ds
    connection_key: ds_conn
    collections:
      - name: bar
        after: [ds.foo]
        fields:
          - name: email
            identity: email
      - name: foo
        fields:
          - name: email
            identity: email
"#;

const STORE: &str = r#"
datasets:
  - name: crm
    connection_key: crm_db
    collections:
      - name: customer
        fields:
          - name: email
            identity: email
          - name: id
          - name: referrer_id
            references:
              - field: crm.customer.id
      - name: address
        fields:
          - name: id
          - name: customer_id
            references:
              - field: crm.customer.id
      - name: orders
        fields:
          - name: id
          - name: customer_id
            references:
              - field: crm.customer.id
                direction: from
          - name: address_id
            references:
              - field: crm.address.id
                direction: from
  - name: audit
    connection_key: audit_api
    after: [crm]
    collections:
      - name: log
        fields:
          - name: email
            identity: email
      - name: export
        after: [audit.log]
        fields:
          - name: phone
            identity: phone
"#;

fn datasets(yaml: &str) -> Vec<Dataset> {
    let doc: DatasetDocument = serde_yaml::from_str(yaml).expect("valid yaml");
    doc.datasets
}

fn graph(yaml: &str) -> Arc<DatasetGraph> {
    Arc::new(DatasetGraph::new(&datasets(yaml)).expect("valid graph"))
}

fn seed(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object seed")
}

fn addr(value: &str) -> CollectionAddress {
    value.parse().unwrap()
}

fn names(addresses: &[CollectionAddress]) -> Vec<String> {
    addresses.iter().map(|a| a.to_string()).collect()
}

#[test]
fn dependency_edge_orders_dispatch() {
    let traversal = Traversal::new(graph(FOO_BAR), seed(json!({"email": "a@b.com"}))).unwrap();
    assert_eq!(
        names(traversal.visit_order()),
        vec!["__ROOT__:__ROOT__", "ds.foo", "ds.bar"]
    );
    assert_eq!(names(traversal.end_nodes()), vec!["ds.bar"]);
    assert!(traversal.root().is_root_node());
    assert_eq!(traversal.root().address, CollectionAddress::root());

    let incoming = traversal.incoming_edges(&addr("ds.bar"));
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].parent, addr("ds.foo"));
    assert_eq!(incoming[0].parent_field, FieldPath::parse("id"));
    assert_eq!(incoming[0].child_field, FieldPath::parse("foo_id"));

    let from_root = traversal.incoming_edges(&addr("ds.foo"));
    assert_eq!(from_root.len(), 1);
    assert!(from_root[0].parent.is_root());
    assert_eq!(from_root[0].child_field, FieldPath::parse("email"));
    assert!(traversal.parent_addresses(&addr("ds.bar")).contains(&addr("ds.foo")));
    assert!(traversal.child_addresses(&addr("ds.foo")).contains(&addr("ds.bar")));
}

#[test]
fn after_constraint_without_edge_still_blocks() {
    let traversal = Traversal::new(graph(AFTER_ONLY), seed(json!({"email": "a@b.com"}))).unwrap();
    assert_eq!(
        names(traversal.visit_order()),
        vec!["__ROOT__:__ROOT__", "ds.foo", "ds.bar"]
    );
    assert_eq!(names(traversal.end_nodes()), vec!["ds.foo", "ds.bar"]);
}

#[test]
fn ordering_predecessors_expand_collection_and_dataset_after() {
    let traversal = Traversal::new(
        graph(STORE),
        seed(json!({"email": "a@b.com", "phone": "555"})),
    )
    .unwrap();

    assert!(traversal.ordering_predecessors(&addr("crm.orders")).is_empty());
    let log: Vec<CollectionAddress> =
        traversal.ordering_predecessors(&addr("audit.log")).into_iter().collect();
    assert_eq!(names(&log), vec!["crm.customer", "crm.address", "crm.orders"]);
    let export: Vec<String> = traversal
        .ordering_predecessors(&addr("audit.export"))
        .iter()
        .map(|a| a.to_string())
        .collect();
    assert_eq!(export, vec!["audit.log", "crm.customer", "crm.address", "crm.orders"]);
}

#[test]
fn missing_identity_seed_makes_nodes_unreachable() {
    let err = Traversal::new(graph(FOO_BAR), seed(json!({"phone": "555"}))).unwrap_err();
    assert_eq!(err.category, ErrorCategory::TraversalError);
    assert_eq!(err.code, "DSR-TRAV-002");
    assert!(err.message.contains("ds.foo"));

    let err = Traversal::new(graph(FOO_BAR), seed(json!({"email": null}))).unwrap_err();
    assert_eq!(err.code, "DSR-TRAV-002");
}

#[test]
fn visits_every_reachable_node_once_and_consumes_every_edge() {
    let traversal = Traversal::new(
        graph(STORE),
        seed(json!({"email": "a@b.com", "phone": "555"})),
    )
    .unwrap();

    let order = names(traversal.visit_order());
    assert_eq!(order.len(), traversal.nodes().count() + 1);
    let mut unique = order.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), order.len());

    // Every non-self edge between real collections was wired exactly once.
    let wired: Vec<(String, String)> = traversal
        .resolved_edges()
        .iter()
        .filter(|edge| !edge.parent.is_root())
        .map(|edge| (edge.parent.to_string(), edge.child.to_string()))
        .collect();
    assert_eq!(wired.len(), 3);
    assert!(wired.contains(&("crm.customer".into(), "crm.orders".into())));
    assert!(wired.contains(&("crm.address".into(), "crm.orders".into())));
    assert!(wired.contains(&("crm.customer".into(), "crm.address".into())));
}

#[test]
fn nothing_is_dispatched_before_its_dependencies() {
    let datasets = datasets(STORE);
    let graph = Arc::new(DatasetGraph::new(&datasets).unwrap());
    let mut traversal = Traversal::new(
        graph.clone(),
        seed(json!({"email": "a@b.com", "phone": "555"})),
    )
    .unwrap();

    let mut dispatched: Vec<CollectionAddress> = Vec::new();
    let ends = traversal
        .traverse(&mut dispatched, |node, order| order.push(node.address.clone()))
        .unwrap();
    assert_eq!(ends, traversal.end_nodes().to_vec());

    let position: HashMap<&CollectionAddress, usize> =
        dispatched.iter().enumerate().map(|(i, a)| (a, i)).collect();

    for edge in graph.edges.iter().filter(|edge| !edge.bidirectional) {
        if edge.from.collection == edge.to.collection {
            continue;
        }
        assert!(
            position[&edge.from.collection] < position[&edge.to.collection],
            "{} dispatched before its source",
            edge.to.collection
        );
    }
    for dataset in &datasets {
        for collection in &dataset.collections {
            let here = CollectionAddress::new(dataset.name.clone(), collection.name.clone());
            for before in &collection.after {
                assert!(position[before] < position[&here]);
            }
            for other in &dataset.after {
                for (address, index) in &position {
                    if &address.dataset == other {
                        assert!(*index < position[&here]);
                    }
                }
            }
        }
    }
}

#[test]
fn after_cycle_deadlocks_instead_of_looping() {
    let yaml = r#"
datasets:
  - name: ds
    connection_key: c
    collections:
      - name: a
        after: [ds.b]
        fields:
          - name: email
            identity: email
      - name: b
        after: [ds.a]
        fields:
          - name: email
            identity: email
"#;
    let err = Traversal::new(graph(yaml), seed(json!({"email": "x"}))).unwrap_err();
    assert_eq!(err.category, ErrorCategory::TraversalError);
    assert_eq!(err.code, "DSR-TRAV-001");
    assert!(err.message.contains("ds.a") && err.message.contains("ds.b"));
}

#[test]
fn mutual_directed_references_deadlock() {
    let yaml = r#"
datasets:
  - name: ds
    connection_key: c
    collections:
      - name: a
        fields:
          - name: email
            identity: email
          - name: id
          - name: b_id
            references:
              - field: ds.b.id
                direction: from
      - name: b
        fields:
          - name: email
            identity: email
          - name: id
          - name: a_id
            references:
              - field: ds.a.id
                direction: from
"#;
    let err = Traversal::new(graph(yaml), seed(json!({"email": "x"}))).unwrap_err();
    assert_eq!(err.code, "DSR-TRAV-001");
}

#[test]
fn collection_without_any_path_from_root_is_reported() {
    let yaml = r#"
datasets:
  - name: ds
    connection_key: c
    collections:
      - name: foo
        fields:
          - name: email
            identity: email
      - name: orphan
        fields:
          - name: id
"#;
    let err = Traversal::new(graph(yaml), seed(json!({"email": "x"}))).unwrap_err();
    assert_eq!(err.code, "DSR-TRAV-002");
    assert!(err.message.contains("ds.orphan"));
    assert!(!err.message.contains("ds.foo"));
}

#[test]
fn self_references_are_consumed() {
    let yaml = r#"
datasets:
  - name: ds
    connection_key: c
    collections:
      - name: employee
        fields:
          - name: email
            identity: email
          - name: id
          - name: manager_id
            references:
              - field: ds.employee.id
"#;
    let traversal = Traversal::new(graph(yaml), seed(json!({"email": "x"}))).unwrap();
    assert_eq!(names(traversal.end_nodes()), vec!["ds.employee"]);
}

#[test]
fn empty_graph_ends_at_root() {
    let traversal = Traversal::new(Arc::new(DatasetGraph::new(&[]).unwrap()), Map::new()).unwrap();
    assert_eq!(traversal.nodes().count(), 0);
    assert!(traversal.end_nodes()[0].is_root());
}

#[test]
fn filtered_values_keep_only_wired_castable_inputs() {
    let traversal = Traversal::new(graph(FOO_BAR), seed(json!({"email": "a@b.com"}))).unwrap();
    let input = seed(json!({
        "foo_id": [1, "2", null, "x", 3.0],
        "unwired": [1, 2],
        "email": ["a@b.com"],
    }));
    let filtered = traversal.typed_filtered_values(&addr("ds.bar"), &input);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered["foo_id"], vec![json!(1), json!(2), json!(3)]);

    let nothing_castable = seed(json!({"foo_id": ["x", null], "email": "not-a-list"}));
    assert!(traversal
        .typed_filtered_values(&addr("ds.bar"), &nothing_castable)
        .is_empty());

    let scalar = seed(json!({"foo_id": 5}));
    assert!(traversal.typed_filtered_values(&addr("ds.bar"), &scalar).is_empty());

    for value in traversal
        .typed_filtered_values(&addr("ds.foo"), &seed(json!({"email": ["a@b.com"], "foo_id": [1]})))
        .values()
    {
        assert!(!value.is_empty());
    }
}
