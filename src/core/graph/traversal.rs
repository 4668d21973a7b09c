#![allow(clippy::result_large_err)] // Traversal failures carry the unreachable node and edge lists inside AppError.

//! Ordering of a dataset graph for one identity seed.
//!
//! A [`Traversal`] walks the graph from an artificial ROOT node whose fields
//! are the seed's identity values. A node may run once every collection it
//! is declared to run `after` has been visited and every unvisited source of
//! a directed edge into it has run; edges are wired lazily, as the second of
//! their two endpoints is visited. Construction performs a dry run, so a
//! `Traversal` value is always a valid ordering.

use crate::core::error::AppError;
use crate::core::graph::address::{CollectionAddress, FieldPath};
use crate::core::graph::config::Node;
use crate::core::graph::dataset_graph::DatasetGraph;
use crate::core::graph::edge::{delete_edges, Edge};
use crate::core::graph::traversal_node::{EdgeId, InputData, ResolvedEdge, TraversalNode};
use crate::core::types::ErrorCategory;
use indexmap::{IndexMap, IndexSet};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::{Bfs, NodeFiltered};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// FIFO queue whose pop takes the first element satisfying a predicate.
struct MatchingQueue {
    items: VecDeque<CollectionAddress>,
}

impl MatchingQueue {
    fn new(first: CollectionAddress) -> Self {
        let mut items = VecDeque::new();
        items.push_back(first);
        MatchingQueue { items }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn pop_first_match<F>(&mut self, mut predicate: F) -> Option<CollectionAddress>
    where
        F: FnMut(&CollectionAddress) -> bool,
    {
        let position = self.items.iter().position(|item| predicate(item))?;
        self.items.remove(position)
    }

    fn push_if_new(&mut self, address: CollectionAddress) {
        if !self.items.contains(&address) {
            self.items.push_back(address);
        }
    }

    fn describe(&self) -> String {
        self.items
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Validated visit order over a [`DatasetGraph`] for one identity seed.
#[derive(Debug, Clone)]
pub struct Traversal {
    graph: Arc<DatasetGraph>,
    seed: Map<String, Value>,
    nodes: IndexMap<CollectionAddress, TraversalNode>,
    edges: IndexSet<Edge>,
    resolved: Vec<ResolvedEdge>,
    inbound_blockers: HashMap<CollectionAddress, IndexSet<CollectionAddress>>,
    visit_order: Vec<CollectionAddress>,
    end_nodes: Vec<CollectionAddress>,
}

impl Traversal {
    /// Build and dry-run a traversal; fails if any node or edge cannot be reached.
    pub fn new(graph: Arc<DatasetGraph>, seed: Map<String, Value>) -> Result<Self, AppError> {
        let root = CollectionAddress::root();
        let mut nodes = IndexMap::new();
        nodes.insert(
            root.clone(),
            TraversalNode::new(Node::artificial(root.clone())),
        );
        for (address, node) in &graph.nodes {
            nodes.insert(address.clone(), TraversalNode::new(node.clone()));
        }

        let mut edges = graph.edges.clone();
        for (field_address, seed_key) in &graph.identity_keys {
            if seed.get(seed_key).map(|v| !v.is_null()).unwrap_or(false) {
                edges.insert(Edge::directed(
                    root.field(FieldPath::new([seed_key.clone()])),
                    field_address.clone(),
                ));
            }
        }

        let inbound_blockers = compute_inbound_blockers(&nodes, &edges);
        let mut traversal = Traversal {
            graph,
            seed,
            nodes,
            edges,
            resolved: Vec::new(),
            inbound_blockers,
            visit_order: Vec::new(),
            end_nodes: Vec::new(),
        };
        traversal.traverse(&mut (), |node, _| {
            tracing::debug!(node = %node.address, "dry-run visit");
        })?;
        Ok(traversal)
    }

    /// Walk the graph in dependency order, calling `node_run_fn` once per node.
    ///
    /// Returns the addresses of terminal nodes: visited nodes with no
    /// remaining outgoing edges.
    pub fn traverse<E, F>(
        &mut self,
        environment: &mut E,
        mut node_run_fn: F,
    ) -> Result<Vec<CollectionAddress>, AppError>
    where
        F: FnMut(&TraversalNode, &mut E),
    {
        self.reset();
        let root = CollectionAddress::root();
        let mut remaining_node_keys: IndexSet<CollectionAddress> = self
            .nodes
            .keys()
            .filter(|address| !address.is_root())
            .cloned()
            .collect();
        let mut finished_nodes: IndexSet<CollectionAddress> = IndexSet::new();
        let mut running_node_queue = MatchingQueue::new(root);
        let mut remaining_edges = self.edges.clone();

        while !running_node_queue.is_empty() {
            let Some(address) = running_node_queue
                .pop_first_match(|candidate| self.may_run(candidate, &remaining_node_keys))
            else {
                return Err(AppError::new(
                    ErrorCategory::TraversalError,
                    format!(
                        "no queued node can run; waiting nodes: [{}]",
                        running_node_queue.describe()
                    ),
                )
                .with_code("DSR-TRAV-001")
                .with_suggestion("check `after` constraints and directed references for cycles"));
            };

            node_run_fn(&self.nodes[&address], environment);

            for finished in &finished_nodes {
                for edge in delete_edges(&mut remaining_edges, finished, &address) {
                    if !edge.ends_with_collection(&address) {
                        continue;
                    }
                    if let Some((parent_field, child_field)) = edge.split_by_address(finished) {
                        let parent_path = parent_field.path.clone();
                        let child_path = child_field.path.clone();
                        self.wire(finished, parent_path, &address, child_path);
                    }
                }
            }

            let touching: Vec<Edge> = remaining_edges
                .iter()
                .filter(|edge| edge.contains(&address))
                .cloned()
                .collect();
            let mut has_children = false;
            for edge in touching {
                if edge.is_self_reference() {
                    remaining_edges.shift_remove(&edge);
                    continue;
                }
                if let Some((_, other)) = edge.split_by_address(&address) {
                    has_children = true;
                    if self.nodes.contains_key(&other.collection) {
                        running_node_queue.push_if_new(other.collection.clone());
                    }
                }
            }
            if let Some(node) = self.nodes.get_mut(&address) {
                node.is_terminal_node = !has_children;
            }

            remaining_node_keys.shift_remove(&address);
            finished_nodes.insert(address.clone());
            self.visit_order.push(address);
        }

        if !remaining_node_keys.is_empty() {
            let names: Vec<String> = remaining_node_keys.iter().map(|a| a.to_string()).collect();
            return Err(AppError::new(
                ErrorCategory::TraversalError,
                format!("some nodes were not reachable: [{}]", names.join(", ")),
            )
            .with_code("DSR-TRAV-002")
            .with_suggestion("add an identity field or a reference that connects these collections"));
        }
        if !remaining_edges.is_empty() {
            let names: Vec<String> = remaining_edges.iter().map(|e| e.to_string()).collect();
            return Err(AppError::new(
                ErrorCategory::TraversalError,
                format!("some edges were not reachable: [{}]", names.join(", ")),
            )
            .with_code("DSR-TRAV-003"));
        }

        self.end_nodes = finished_nodes
            .iter()
            .filter(|address| self.nodes[*address].is_terminal_node)
            .cloned()
            .collect();
        Ok(self.end_nodes.clone())
    }

    fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.reset();
        }
        self.resolved.clear();
        self.visit_order.clear();
        self.end_nodes.clear();
    }

    fn may_run(&self, address: &CollectionAddress, remaining: &IndexSet<CollectionAddress>) -> bool {
        let Some(node) = self.nodes.get(address) else {
            return false;
        };
        if !node.can_run_given(remaining) {
            return false;
        }
        match self.inbound_blockers.get(address) {
            Some(sources) => !sources.iter().any(|source| remaining.contains(source)),
            None => true,
        }
    }

    fn wire(
        &mut self,
        parent: &CollectionAddress,
        parent_field: FieldPath,
        child: &CollectionAddress,
        child_field: FieldPath,
    ) {
        let id = self.resolved.len();
        self.resolved.push(ResolvedEdge {
            id,
            parent: parent.clone(),
            parent_field,
            child: child.clone(),
            child_field,
        });
        if let Some(node) = self.nodes.get_mut(parent) {
            node.child_edges.push(id);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent_edges.push(id);
        }
    }

    pub fn graph(&self) -> &DatasetGraph {
        &self.graph
    }

    pub fn seed(&self) -> &Map<String, Value> {
        &self.seed
    }

    pub fn root(&self) -> &TraversalNode {
        &self.nodes[&CollectionAddress::root()]
    }

    pub fn node(&self, address: &CollectionAddress) -> Option<&TraversalNode> {
        self.nodes.get(address)
    }

    /// Graph nodes in declaration order, ROOT excluded.
    pub fn nodes(&self) -> impl Iterator<Item = &TraversalNode> {
        self.nodes.values().filter(|node| !node.is_root_node())
    }

    /// Graph edges plus the synthesized identity-seed edges.
    pub fn edges(&self) -> &IndexSet<Edge> {
        &self.edges
    }

    pub fn resolved_edges(&self) -> &[ResolvedEdge] {
        &self.resolved
    }

    pub fn edge(&self, id: EdgeId) -> Option<&ResolvedEdge> {
        self.resolved.get(id)
    }

    /// Order in which the last traversal visited nodes, ROOT first.
    pub fn visit_order(&self) -> &[CollectionAddress] {
        &self.visit_order
    }

    pub fn end_nodes(&self) -> &[CollectionAddress] {
        &self.end_nodes
    }

    pub fn incoming_edges(&self, address: &CollectionAddress) -> Vec<&ResolvedEdge> {
        self.nodes
            .get(address)
            .map(|node| node.incoming_edges(&self.resolved).collect())
            .unwrap_or_default()
    }

    pub fn outgoing_edges(&self, address: &CollectionAddress) -> Vec<&ResolvedEdge> {
        self.nodes
            .get(address)
            .map(|node| node.outgoing_edges(&self.resolved).collect())
            .unwrap_or_default()
    }

    pub fn parent_addresses(&self, address: &CollectionAddress) -> IndexSet<CollectionAddress> {
        self.incoming_edges(address)
            .into_iter()
            .map(|edge| edge.parent.clone())
            .collect()
    }

    pub fn child_addresses(&self, address: &CollectionAddress) -> IndexSet<CollectionAddress> {
        self.outgoing_edges(address)
            .into_iter()
            .map(|edge| edge.child.clone())
            .collect()
    }

    /// Collections that `after` constraints order before `address`: its own
    /// `after` list plus every collection of the datasets its dataset runs after.
    pub fn ordering_predecessors(&self, address: &CollectionAddress) -> IndexSet<CollectionAddress> {
        let Some(node) = self.nodes.get(address).map(|n| &n.node) else {
            return IndexSet::new();
        };
        let mut out: IndexSet<CollectionAddress> = node
            .collection
            .after
            .iter()
            .filter(|before| self.nodes.contains_key(*before))
            .cloned()
            .collect();
        if !node.dataset_after.is_empty() {
            out.extend(
                self.nodes
                    .keys()
                    .filter(|other| node.dataset_after.contains(&other.dataset))
                    .cloned(),
            );
        }
        out.shift_remove(address);
        out.shift_remove(&CollectionAddress::root());
        out
    }

    pub fn typed_filtered_values(
        &self,
        address: &CollectionAddress,
        input_data: &Map<String, Value>,
    ) -> InputData {
        self.nodes
            .get(address)
            .map(|node| node.typed_filtered_values(&self.resolved, input_data))
            .unwrap_or_default()
    }
}

/// For each node, the sources of directed edges into it that can be reached
/// from ROOT without passing through the node itself.
fn compute_inbound_blockers(
    nodes: &IndexMap<CollectionAddress, TraversalNode>,
    edges: &IndexSet<Edge>,
) -> HashMap<CollectionAddress, IndexSet<CollectionAddress>> {
    let mut graph: UnGraph<CollectionAddress, ()> = UnGraph::new_undirected();
    let mut index: HashMap<CollectionAddress, NodeIndex> = HashMap::new();
    for address in nodes.keys() {
        index.insert(address.clone(), graph.add_node(address.clone()));
    }
    for edge in edges {
        let from = node_index(&mut graph, &mut index, &edge.from.collection);
        let to = node_index(&mut graph, &mut index, &edge.to.collection);
        graph.update_edge(from, to, ());
    }

    let mut blockers = HashMap::new();
    let Some(&root) = index.get(&CollectionAddress::root()) else {
        return blockers;
    };
    for address in nodes.keys() {
        let sources: IndexSet<CollectionAddress> = edges
            .iter()
            .filter(|edge| !edge.bidirectional && !edge.is_self_reference())
            .filter(|edge| &edge.to.collection == address && !edge.from.collection.is_root())
            .map(|edge| edge.from.collection.clone())
            .collect();
        if sources.is_empty() {
            continue;
        }
        let avoid = index[address];
        let reachable = reachable_avoiding(&graph, root, avoid);
        let gating: IndexSet<CollectionAddress> = sources
            .into_iter()
            .filter(|source| index.get(source).is_some_and(|idx| reachable.contains(idx)))
            .collect();
        if !gating.is_empty() {
            blockers.insert(address.clone(), gating);
        }
    }
    blockers
}

fn node_index(
    graph: &mut UnGraph<CollectionAddress, ()>,
    index: &mut HashMap<CollectionAddress, NodeIndex>,
    address: &CollectionAddress,
) -> NodeIndex {
    if let Some(idx) = index.get(address) {
        return *idx;
    }
    let idx = graph.add_node(address.clone());
    index.insert(address.clone(), idx);
    idx
}

fn reachable_avoiding(
    graph: &UnGraph<CollectionAddress, ()>,
    start: NodeIndex,
    avoid: NodeIndex,
) -> HashSet<NodeIndex> {
    let view = NodeFiltered::from_fn(graph, |idx| idx != avoid);
    let mut bfs = Bfs::new(&view, start);
    let mut seen = HashSet::new();
    while let Some(idx) = bfs.next(&view) {
        seen.insert(idx);
    }
    seen
}
