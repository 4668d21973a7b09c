use crate::core::graph::address::{CollectionAddress, FieldAddress};
use indexmap::IndexSet;
use std::fmt;

/// Reference between two fields.
///
/// Directed edges propagate values from `from` to `to`. Bidirectional edges
/// store their endpoints in canonical order so that declaring the reference
/// from either side yields an equal edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: FieldAddress,
    pub to: FieldAddress,
    pub bidirectional: bool,
}

impl Edge {
    pub fn directed(from: FieldAddress, to: FieldAddress) -> Self {
        Edge {
            from,
            to,
            bidirectional: false,
        }
    }

    pub fn bidirectional(a: FieldAddress, b: FieldAddress) -> Self {
        let (from, to) = if a <= b { (a, b) } else { (b, a) };
        Edge {
            from,
            to,
            bidirectional: true,
        }
    }

    /// True if either endpoint belongs to `address`.
    pub fn contains(&self, address: &CollectionAddress) -> bool {
        &self.from.collection == address || &self.to.collection == address
    }

    /// True if values along this edge can flow into `address`.
    pub fn ends_with_collection(&self, address: &CollectionAddress) -> bool {
        &self.to.collection == address || (self.bidirectional && &self.from.collection == address)
    }

    /// `(side at address, other side)`, or `None` when the edge does not touch `address`.
    pub fn split_by_address(&self, address: &CollectionAddress) -> Option<(&FieldAddress, &FieldAddress)> {
        if &self.from.collection == address {
            Some((&self.from, &self.to))
        } else if &self.to.collection == address {
            Some((&self.to, &self.from))
        } else {
            None
        }
    }

    /// True if the edge connects the unordered collection pair `{a, b}`.
    pub fn touches_pair(&self, a: &CollectionAddress, b: &CollectionAddress) -> bool {
        (&self.from.collection == a && &self.to.collection == b)
            || (&self.from.collection == b && &self.to.collection == a)
    }

    pub fn is_self_reference(&self) -> bool {
        self.from.collection == self.to.collection
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.bidirectional { "<->" } else { "->" };
        write!(f, "{} {} {}", self.from, arrow, self.to)
    }
}

/// Remove and return every edge between `a` and `b`, regardless of declared direction.
pub fn delete_edges(
    edges: &mut IndexSet<Edge>,
    a: &CollectionAddress,
    b: &CollectionAddress,
) -> Vec<Edge> {
    let removed: Vec<Edge> = edges
        .iter()
        .filter(|edge| edge.touches_pair(a, b))
        .cloned()
        .collect();
    for edge in &removed {
        edges.shift_remove(edge);
    }
    removed
}
