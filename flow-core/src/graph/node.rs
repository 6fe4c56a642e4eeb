//! Graph Nodes
//!
//! This module defines the per-node bookkeeping shared by every node in the
//! flow graph, independent of the value type the node carries.

use std::fmt;

use indexmap::IndexSet;

/// Identifier of a node inside its manager's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The role a node plays in the flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node. Holds a value and has no inputs.
    Provider,

    /// A transform between an input edge and output edges.
    Modifier,

    /// A sink node. Consumes values and has no outputs.
    Terminal,
}

/// How a node reacts when an upstream value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// The new value is delivered immediately and synchronously.
    #[default]
    Eager,

    /// The node is only flagged as expired. The value is resolved when a
    /// consumer pulls it.
    Lazy,
}

/// Connectivity and freshness state of a node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    behavior: Behavior,

    /// Set when an ancestor changed and this node has not been resolved since.
    expired: bool,

    /// Data clock value of the newest data this node has seen.
    stamp: u64,

    /// Name shown in log fields.
    label: Option<String>,

    /// Nodes this node delivers to.
    successors: IndexSet<NodeId>,

    /// Nodes that deliver to this node.
    predecessors: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node. Nodes start fresh with no edges.
    pub fn new(id: NodeId, kind: NodeKind, behavior: Behavior) -> Self {
        Self {
            id,
            kind,
            behavior,
            expired: false,
            stamp: 0,
            label: None,
            successors: IndexSet::new(),
            predecessors: IndexSet::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's role.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get how the node reacts to upstream changes.
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Check if the node only flags itself on upstream changes.
    pub fn is_lazy(&self) -> bool {
        self.behavior == Behavior::Lazy
    }

    /// Check if the node is expired.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Flag the node as expired. Returns `true` if the flag was newly set.
    pub fn mark_expired(&mut self) -> bool {
        !std::mem::replace(&mut self.expired, true)
    }

    /// Clear the expired flag.
    pub fn clear_expired(&mut self) {
        self.expired = false;
    }

    /// Get the stamp of the newest data this node has seen.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Record the stamp of the data just processed.
    pub fn set_stamp(&mut self, stamp: u64) {
        self.stamp = stamp;
    }

    /// Get the node's label, if it was named.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Set the label shown in logs.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Add an outgoing edge. Returns `false` if it already existed.
    pub fn add_successor(&mut self, node_id: NodeId) -> bool {
        self.successors.insert(node_id)
    }

    /// Remove an outgoing edge. Returns `false` if it was absent.
    pub fn remove_successor(&mut self, node_id: NodeId) -> bool {
        self.successors.shift_remove(&node_id)
    }

    /// Get the nodes this node delivers to, in edge order.
    pub fn successors(&self) -> &IndexSet<NodeId> {
        &self.successors
    }

    /// Add an incoming edge. Returns `false` if it already existed.
    pub fn add_predecessor(&mut self, node_id: NodeId) -> bool {
        self.predecessors.insert(node_id)
    }

    /// Remove an incoming edge. Returns `false` if it was absent.
    pub fn remove_predecessor(&mut self, node_id: NodeId) -> bool {
        self.predecessors.shift_remove(&node_id)
    }

    /// Get the nodes that deliver to this node.
    pub fn predecessors(&self) -> &IndexSet<NodeId> {
        &self.predecessors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_starts_fresh() {
        let node = Node::new(NodeId::from(0), NodeKind::Modifier, Behavior::Lazy);
        assert_eq!(node.kind(), NodeKind::Modifier);
        assert!(node.is_lazy());
        assert!(!node.is_expired());
        assert_eq!(node.stamp(), 0);
        assert!(node.successors().is_empty());
        assert!(node.predecessors().is_empty());
    }

    #[test]
    fn default_behavior_is_eager() {
        assert_eq!(Behavior::default(), Behavior::Eager);
    }

    #[test]
    fn edge_management() {
        let mut node = Node::new(NodeId::from(0), NodeKind::Provider, Behavior::Eager);
        let a = NodeId::from(1);
        let b = NodeId::from(2);

        assert!(node.add_successor(a));
        assert!(node.add_successor(b));
        assert!(!node.add_successor(a));
        assert_eq!(node.successors().len(), 2);

        // insertion order is kept after removal
        assert!(node.remove_successor(a));
        assert!(!node.remove_successor(a));
        assert_eq!(node.successors().iter().copied().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn expiry_transitions() {
        let mut node = Node::new(NodeId::from(4), NodeKind::Terminal, Behavior::Lazy);

        assert!(node.mark_expired());
        assert!(node.is_expired());

        // already expired
        assert!(!node.mark_expired());

        node.clear_expired();
        assert!(!node.is_expired());
    }

    #[test]
    fn display_uses_hash_prefix() {
        assert_eq!(NodeId::from(12).to_string(), "#12");
        assert_eq!(NodeId::from(12).index(), 12);
    }

    #[test]
    fn ids_do_not_wrap_at_u32() {
        let id = NodeId::from(u64::from(u32::MAX) + 1);
        assert_eq!(id.to_string(), "#4294967296");
        assert_ne!(id, NodeId::from(0));
    }
}
