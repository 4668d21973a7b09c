//! Dataset graph model and traversal ordering.

pub mod address;
pub mod config;
pub mod dataset_graph;
pub mod dot;
pub mod edge;
pub mod lint;
pub mod schema;
pub mod traversal;
pub mod traversal_node;

pub use address::{CollectionAddress, FieldAddress, FieldPath};
pub use config::{Collection, DataType, Dataset, EdgeDirection, Field, FieldReference, Node};
pub use dataset_graph::DatasetGraph;
pub use edge::Edge;
pub use traversal::Traversal;
pub use traversal_node::{EdgeId, InputData, ResolvedEdge, TraversalNode};
