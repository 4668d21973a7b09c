#![allow(clippy::result_large_err)] // Graph construction returns AppError so the offending address travels with the error.

use crate::core::error::AppError;
use crate::core::graph::address::{CollectionAddress, FieldAddress};
use crate::core::graph::config::{Dataset, EdgeDirection, Node};
use crate::core::graph::edge::Edge;
use crate::core::graph::schema::dataset_hash;
use crate::core::types::ErrorCategory;
use indexmap::{IndexMap, IndexSet};

/// Union of every dataset's collections and field references.
#[derive(Debug, Clone)]
pub struct DatasetGraph {
    pub nodes: IndexMap<CollectionAddress, Node>,
    pub edges: IndexSet<Edge>,
    /// Fields bound directly to a user-supplied identity value.
    pub identity_keys: IndexMap<FieldAddress, String>,
    /// SHA-256 of the dataset definitions the graph was built from.
    pub hash: String,
}

impl DatasetGraph {
    pub fn new(datasets: &[Dataset]) -> Result<Self, AppError> {
        let mut nodes = IndexMap::new();
        for dataset in datasets {
            for collection in &dataset.collections {
                let node = Node::new(dataset, collection.clone());
                if let Some(path) = node.collection.duplicate_field_name() {
                    return Err(AppError::new(
                        ErrorCategory::GraphConstructionError,
                        format!("duplicate field '{}' in collection {}", path, node.address),
                    )
                    .with_code("DSR-GRAPH-003"));
                }
                if nodes.contains_key(&node.address) {
                    return Err(AppError::new(
                        ErrorCategory::GraphConstructionError,
                        format!("duplicate collection address {}", node.address),
                    )
                    .with_code("DSR-GRAPH-001")
                    .with_suggestion("dataset and collection names must be unique across all datasets"));
                }
                nodes.insert(node.address.clone(), node);
            }
        }

        let mut edges = IndexSet::new();
        let mut identity_keys = IndexMap::new();
        for node in nodes.values() {
            for (path, field) in node.collection.field_paths() {
                let here = node.address.field(path);
                if let Some(seed_key) = &field.identity {
                    identity_keys.insert(here.clone(), seed_key.clone());
                }
                for reference in &field.references {
                    let edge = match reference.direction {
                        Some(EdgeDirection::From) => {
                            Edge::directed(reference.field.clone(), here.clone())
                        }
                        Some(EdgeDirection::To) => {
                            Edge::directed(here.clone(), reference.field.clone())
                        }
                        None => Edge::bidirectional(here.clone(), reference.field.clone()),
                    };
                    edges.insert(edge);
                }
            }
        }

        let graph = DatasetGraph {
            nodes,
            edges,
            identity_keys,
            hash: dataset_hash(datasets)?,
        };
        graph.check_edges()?;
        tracing::debug!(
            collections = graph.nodes.len(),
            edges = graph.edges.len(),
            identities = graph.identity_keys.len(),
            "dataset graph built"
        );
        Ok(graph)
    }

    fn check_edges(&self) -> Result<(), AppError> {
        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                let address = end.collection_address();
                if !address.is_artificial() && !self.nodes.contains_key(address) {
                    return Err(AppError::new(
                        ErrorCategory::GraphConstructionError,
                        format!("edge {} references unknown collection {}", edge, address),
                    )
                    .with_code("DSR-GRAPH-002"));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, address: &CollectionAddress) -> Option<&Node> {
        self.nodes.get(address)
    }

    /// Dataset names represented in the graph, in declaration order.
    pub fn dataset_names(&self) -> Vec<String> {
        let mut names: IndexSet<String> = IndexSet::new();
        for address in self.nodes.keys() {
            names.insert(address.dataset.clone());
        }
        names.into_iter().collect()
    }

    /// Identity seed keys any field can be queried by.
    pub fn identity_seed_keys(&self) -> IndexSet<String> {
        self.identity_keys.values().cloned().collect()
    }
}
