use crate::core::graph::address::CollectionAddress;
use crate::core::graph::dataset_graph::DatasetGraph;
use crate::core::graph::edge::Edge;
use crate::core::graph::traversal::Traversal;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt;

/// Node weight carrying collection display information.
struct CollectionNode {
    address: String,
    connection_key: String,
}

impl fmt::Display for CollectionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connection_key.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}\n({})", self.address, self.connection_key)
        }
    }
}

/// Edge weight carrying a formatted field label.
struct EdgeData {
    label: String,
}

impl fmt::Display for EdgeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

struct DotBuilder {
    graph: DiGraph<CollectionNode, EdgeData>,
    node_map: HashMap<CollectionAddress, NodeIndex>,
}

impl DotBuilder {
    fn new() -> Self {
        DotBuilder {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    fn node(&mut self, address: &CollectionAddress, connection_key: &str) -> NodeIndex {
        if let Some(idx) = self.node_map.get(address) {
            return *idx;
        }
        let idx = self.graph.add_node(CollectionNode {
            address: address.to_string(),
            connection_key: connection_key.to_string(),
        });
        self.node_map.insert(address.clone(), idx);
        idx
    }

    fn edge(&mut self, from: &CollectionAddress, to: &CollectionAddress, label: String) {
        let a = self.node(from, "");
        let b = self.node(to, "");
        self.graph.add_edge(a, b, EdgeData { label });
    }

    fn render(self) -> String {
        format!("{}", Dot::new(&self.graph))
    }
}

fn declared_label(edge: &Edge) -> String {
    let arrow = if edge.bidirectional { "<->" } else { "->" };
    format!("{} {} {}", edge.from.path, arrow, edge.to.path)
}

/// Render declared collections and references as a Graphviz DOT string.
pub fn graph_to_dot(graph: &DatasetGraph) -> String {
    let mut builder = DotBuilder::new();
    for (address, node) in &graph.nodes {
        builder.node(address, &node.connection_key);
    }
    for edge in &graph.edges {
        builder.edge(&edge.from.collection, &edge.to.collection, declared_label(edge));
    }
    builder.render()
}

/// Render the resolved execution order, ROOT through TERMINATOR.
pub fn traversal_to_dot(traversal: &Traversal) -> String {
    let mut builder = DotBuilder::new();
    builder.node(&CollectionAddress::root(), "");
    for node in traversal.nodes() {
        builder.node(&node.address, &node.node.connection_key);
    }
    for edge in traversal.resolved_edges() {
        let label = format!("{} -> {}", edge.parent_field, edge.child_field);
        builder.edge(&edge.parent, &edge.child, label);
    }
    let terminator = CollectionAddress::terminator();
    for end in traversal.end_nodes() {
        builder.edge(end, &terminator, String::new());
    }
    builder.render()
}
