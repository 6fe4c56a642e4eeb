//! Graph Topology
//!
//! The topology owns the [`Node`] records of every node in a manager and keeps
//! the edge sets consistent: every successor edge has a matching predecessor
//! edge, and no edge is ever accepted if it would close a cycle.
//!
//! # Cycle Detection
//!
//! Adding `from -> to` is rejected when `to` can already reach `from` through
//! existing successor edges. The check is a depth-first search starting at
//! `to`, so its cost is bounded by the size of the subgraph below `to`.

use std::collections::HashSet;

use smallvec::SmallVec;
use tracing::trace;

use super::node::{Behavior, Node, NodeId, NodeKind};
use crate::error::{FlowError, Result};

/// Arena of node records, indexed by [`NodeId`].
#[derive(Debug, Default)]
pub struct Topology {
    nodes: Vec<Node>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Allocate a record for a new node and return its ID.
    pub fn add_node(&mut self, kind: NodeKind, behavior: Behavior) -> NodeId {
        let id = NodeId::from(self.nodes.len() as u64);
        self.nodes.push(Node::new(id, kind, behavior));
        id
    }

    /// Get a node record.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this topology.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Get a mutable node record.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Add the edge `from -> to`.
    ///
    /// Returns `Ok(false)` if the edge already existed.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        if self.node(from).successors().contains(&to) {
            return Ok(false);
        }
        if self.can_reach(to, from) {
            return Err(FlowError::Cycle { from, to });
        }

        self.node_mut(from).add_successor(to);
        self.node_mut(to).add_predecessor(from);
        trace!(%from, %to, "edge added");
        Ok(true)
    }

    /// Remove the edge `from -> to`. Returns `false` if there was no such edge.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.node_mut(from).remove_successor(to);
        if removed {
            self.node_mut(to).remove_predecessor(from);
            trace!(%from, %to, "edge removed");
        }
        removed
    }

    /// Whether `target` is reachable from `start` along successor edges.
    /// A node always reaches itself.
    pub fn can_reach(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::new();
        stack.push(start);

        while let Some(node_id) = stack.pop() {
            if node_id == target {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            stack.extend(self.node(node_id).successors().iter().copied());
        }

        false
    }

    /// Flag `start` and everything downstream of it as expired.
    ///
    /// Returns the nodes whose flag was newly set, in breadth-first order.
    pub fn expire_from(&mut self, start: NodeId) -> Vec<NodeId> {
        let mut newly_expired = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(start);

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            let node = self.node_mut(node_id);
            if node.mark_expired() {
                newly_expired.push(node_id);
            }
            queue.extend(node.successors().iter().copied());
        }

        newly_expired
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(topology: &mut Topology, len: usize) -> Vec<NodeId> {
        let ids: Vec<_> = (0..len)
            .map(|_| topology.add_node(NodeKind::Modifier, Behavior::Eager))
            .collect();
        for pair in ids.windows(2) {
            topology.add_edge(pair[0], pair[1]).unwrap();
        }
        ids
    }

    #[test]
    fn add_and_remove_edges() {
        let mut topology = Topology::new();
        let source = topology.add_node(NodeKind::Provider, Behavior::Eager);
        let sink = topology.add_node(NodeKind::Terminal, Behavior::Eager);

        assert!(topology.add_edge(source, sink).unwrap());
        assert!(topology.node(source).successors().contains(&sink));
        assert!(topology.node(sink).predecessors().contains(&source));

        // duplicate is a no-op
        assert!(!topology.add_edge(source, sink).unwrap());
        assert_eq!(topology.node(source).successors().len(), 1);

        assert!(topology.remove_edge(source, sink));
        assert!(topology.node(source).successors().is_empty());
        assert!(topology.node(sink).predecessors().is_empty());

        // absent edge is not an error
        assert!(!topology.remove_edge(source, sink));
    }

    #[test]
    fn rejects_back_edge() {
        let mut topology = Topology::new();
        let ids = chain(&mut topology, 3);

        let err = topology.add_edge(ids[2], ids[1]).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { from, to } if from == ids[2] && to == ids[1]));

        // existing edges are intact
        assert!(topology.node(ids[1]).successors().contains(&ids[2]));
        assert!(!topology.node(ids[2]).successors().contains(&ids[1]));
    }

    #[test]
    fn rejects_self_loop() {
        let mut topology = Topology::new();
        let node = topology.add_node(NodeKind::Modifier, Behavior::Eager);
        assert!(topology.add_edge(node, node).is_err());
    }

    #[test]
    fn diamond_is_allowed() {
        let mut topology = Topology::new();
        let top = topology.add_node(NodeKind::Provider, Behavior::Eager);
        let left = topology.add_node(NodeKind::Modifier, Behavior::Eager);
        let right = topology.add_node(NodeKind::Modifier, Behavior::Eager);
        let bottom = topology.add_node(NodeKind::Terminal, Behavior::Eager);

        topology.add_edge(top, left).unwrap();
        topology.add_edge(top, right).unwrap();
        topology.add_edge(left, bottom).unwrap();
        topology.add_edge(right, bottom).unwrap();

        assert!(topology.can_reach(top, bottom));
        assert!(!topology.can_reach(bottom, top));
    }

    #[test]
    fn expiry_cascades_downstream_only() {
        let mut topology = Topology::new();
        let ids = chain(&mut topology, 4);

        let expired = topology.expire_from(ids[1]);
        assert_eq!(expired, vec![ids[1], ids[2], ids[3]]);
        assert!(!topology.node(ids[0]).is_expired());

        // second pass sets nothing new
        assert!(topology.expire_from(ids[1]).is_empty());
    }
}
