use dsrgraph::core::graph::schema::{load_datasets, DatasetDocument};
use dsrgraph::core::graph::{
    Collection, CollectionAddress, Dataset, DatasetGraph, Edge, EdgeDirection, Field,
    FieldAddress,
};
use dsrgraph::core::ErrorCategory;
use std::fs;
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
            data_type: string
          - name: id
            data_type: integer
            primary_key: true
      - name: address
        fields:
          - name: customer_id
            data_type: integer
            references:
              - field: shop.customer.id
      - name: orders
        fields:
          - name: customer_id
            data_type: integer
            references:
              - field: shop.customer.id
                direction: from
"#;

fn datasets(yaml: &str) -> Vec<Dataset> {
    let doc: DatasetDocument = serde_yaml::from_str(yaml).expect("valid yaml");
    doc.validate().expect("valid names");
    doc.datasets
}

fn field(value: &str) -> FieldAddress {
    value.parse().unwrap()
}

#[test]
fn builds_nodes_edges_and_identity_keys() {
    let graph = DatasetGraph::new(&datasets(SHOP)).unwrap();

    let addresses: Vec<String> = graph.nodes.keys().map(|a| a.to_string()).collect();
    assert_eq!(addresses, vec!["shop.customer", "shop.address", "shop.orders"]);
    assert_eq!(graph.nodes[&"shop.orders".parse::<CollectionAddress>().unwrap()].connection_key, "shop_db");

    assert!(graph.edges.contains(&Edge::bidirectional(
        field("shop.customer.id"),
        field("shop.address.customer_id")
    )));
    assert!(graph.edges.contains(&Edge::directed(
        field("shop.customer.id"),
        field("shop.orders.customer_id")
    )));
    assert_eq!(graph.edges.len(), 2);

    assert_eq!(graph.identity_keys.len(), 1);
    assert_eq!(graph.identity_keys[&field("shop.customer.email")], "email");
    assert_eq!(graph.identity_seed_keys().into_iter().collect::<Vec<_>>(), vec!["email"]);
    assert_eq!(graph.dataset_names(), vec!["shop"]);
}

#[test]
fn duplicate_collection_addresses_are_rejected() {
    let first = Dataset::new("shop", "a", vec![Collection::empty("customer")]);
    let second = Dataset::new("shop", "b", vec![Collection::empty("customer")]);
    let err = DatasetGraph::new(&[first, second]).unwrap_err();
    assert_eq!(err.category, ErrorCategory::GraphConstructionError);
    assert_eq!(err.code, "DSR-GRAPH-001");
    assert!(err.message.contains("shop.customer"));
}

#[test]
fn references_to_unknown_collections_are_rejected() {
    let collection = Collection::new(
        "orders",
        vec![Field::new("customer_id")
            .with_reference(field("crm.customer.id"), Some(EdgeDirection::From))],
    );
    let err = DatasetGraph::new(&[Dataset::new("shop", "db", vec![collection])]).unwrap_err();
    assert_eq!(err.category, ErrorCategory::GraphConstructionError);
    assert_eq!(err.code, "DSR-GRAPH-002");
    assert!(err.message.contains("crm.customer"));
}

#[test]
fn duplicate_field_names_are_rejected() {
    let collection = Collection::new("customer", vec![Field::new("id"), Field::new("id")]);
    let err = DatasetGraph::new(&[Dataset::new("shop", "db", vec![collection])]).unwrap_err();
    assert_eq!(err.code, "DSR-GRAPH-003");
}

#[test]
fn nested_identity_fields_use_dotted_paths() {
    let collection = Collection::new(
        "profile",
        vec![Field::new("contact").with_fields(vec![Field::new("email").with_identity("email")])],
    );
    let graph = DatasetGraph::new(&[Dataset::new("crm", "db", vec![collection])]).unwrap();
    assert_eq!(graph.identity_keys[&field("crm.profile.contact.email")], "email");
}

#[test]
fn graph_hash_tracks_dataset_content() {
    let base = datasets(SHOP);
    let first = DatasetGraph::new(&base).unwrap();
    let again = DatasetGraph::new(&base).unwrap();
    assert_eq!(first.hash, again.hash);

    let mut changed = base.clone();
    changed[0].collections[0].skip_processing = true;
    assert_ne!(first.hash, DatasetGraph::new(&changed).unwrap().hash);
}

#[test]
fn loads_every_yaml_file_in_a_directory() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("b_shop.yml"), SHOP).unwrap();
    fs::write(
        temp.path().join("a_crm.yaml"),
        "datasets:\n  - name: crm\n    connection_key: crm_api\n    collections:\n      - name: lead\n",
    )
    .unwrap();
    fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

    let loaded = load_datasets(temp.path()).unwrap();
    let names: Vec<&str> = loaded.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["crm", "shop"]);
}

#[test]
fn malformed_documents_report_schema_errors() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.yml");
    fs::write(&path, "datasets: [ {name: shop").unwrap();
    let err = load_datasets(&path).unwrap_err();
    assert_eq!(err.code, "DSR-SCHEMA-001");

    fs::write(&path, "datasets:\n  - name: shop\n    connection_key: \" \"\n").unwrap();
    assert_eq!(load_datasets(&path).unwrap_err().code, "DSR-SCHEMA-003");
}

#[test]
fn after_constraints_parse_as_collection_addresses() {
    let yaml = r#"
datasets:
  - name: shop
    connection_key: db
    after: [crm]
    collections:
      - name: orders
        after: [shop.customer]
      - name: customer
"#;
    let loaded = datasets(yaml);
    assert!(loaded[0].after.contains("crm"));
    assert!(loaded[0].collections[0]
        .after
        .contains(&CollectionAddress::new("shop", "customer")));

    let bad = "datasets:\n  - name: shop\n    connection_key: db\n    collections:\n      - name: orders\n        after: [customer]\n";
    assert!(serde_yaml::from_str::<DatasetDocument>(bad).is_err());
}
