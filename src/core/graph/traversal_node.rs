use crate::core::graph::address::{CollectionAddress, FieldPath};
use crate::core::graph::config::Node;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index into a traversal's resolved-edge table.
pub type EdgeId = usize;

/// Filtered, cast input values keyed by destination field path.
pub type InputData = IndexMap<String, Vec<Value>>;

/// Edge whose two endpoints have both been visited by a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEdge {
    pub id: EdgeId,
    pub parent: CollectionAddress,
    pub parent_field: FieldPath,
    pub child: CollectionAddress,
    pub child_field: FieldPath,
}

/// Arena record for one node of a traversal.
///
/// Adjacency is stored as ids into the owning traversal's resolved-edge
/// table; the lists are complete for a given edge only once both of its
/// endpoints have been visited.
#[derive(Debug, Clone)]
pub struct TraversalNode {
    pub address: CollectionAddress,
    pub node: Node,
    pub parent_edges: Vec<EdgeId>,
    pub child_edges: Vec<EdgeId>,
    pub is_terminal_node: bool,
}

impl TraversalNode {
    pub fn new(node: Node) -> Self {
        TraversalNode {
            address: node.address.clone(),
            node,
            parent_edges: Vec::new(),
            child_edges: Vec::new(),
            is_terminal_node: false,
        }
    }

    pub fn is_root_node(&self) -> bool {
        self.address.is_root()
    }

    pub(crate) fn reset(&mut self) {
        self.parent_edges.clear();
        self.child_edges.clear();
        self.is_terminal_node = false;
    }

    /// False while any collection this node must run after is still unvisited,
    /// or while any dataset this node's dataset must run after still has
    /// unvisited collections.
    pub fn can_run_given(&self, remaining_node_keys: &IndexSet<CollectionAddress>) -> bool {
        if self
            .node
            .collection
            .after
            .iter()
            .any(|address| remaining_node_keys.contains(address))
        {
            return false;
        }
        if self.node.dataset_after.is_empty() {
            return true;
        }
        !remaining_node_keys
            .iter()
            .any(|address| self.node.dataset_after.contains(&address.dataset))
    }

    pub fn incoming_edges<'a>(
        &'a self,
        table: &'a [ResolvedEdge],
    ) -> impl Iterator<Item = &'a ResolvedEdge> + 'a {
        self.parent_edges.iter().filter_map(move |id| table.get(*id))
    }

    pub fn outgoing_edges<'a>(
        &'a self,
        table: &'a [ResolvedEdge],
    ) -> impl Iterator<Item = &'a ResolvedEdge> + 'a {
        self.child_edges.iter().filter_map(move |id| table.get(*id))
    }

    /// Field paths on this node that receive values from a parent.
    pub fn input_paths(&self, table: &[ResolvedEdge]) -> IndexSet<FieldPath> {
        self.incoming_edges(table)
            .map(|edge| edge.child_field.clone())
            .collect()
    }

    /// Keep only inputs that arrive over an incoming edge, cast by the destination field.
    ///
    /// Non-list values are ignored, values that fail to cast are dropped, and
    /// keys left without any value are removed.
    pub fn typed_filtered_values(
        &self,
        table: &[ResolvedEdge],
        input_data: &Map<String, Value>,
    ) -> InputData {
        let query_paths = self.input_paths(table);
        let mut out = InputData::new();
        for (key, values) in input_data {
            let path = FieldPath::parse(key);
            if !query_paths.contains(&path) {
                continue;
            }
            let Value::Array(values) = values else {
                continue;
            };
            let field = self.node.collection.field(&path);
            let cast: Vec<Value> = values
                .iter()
                .filter_map(|value| match field {
                    Some(field) => field.cast(value),
                    None if !value.is_null() => Some(value.clone()),
                    None => None,
                })
                .collect();
            if !cast.is_empty() {
                out.insert(key.clone(), cast);
            }
        }
        out
    }
}
