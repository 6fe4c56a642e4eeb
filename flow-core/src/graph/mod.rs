//! Flow Graph Topology
//!
//! This module implements the type-independent part of the flow graph: node
//! identity, edge sets, expiry flags and data stamps.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are providers, modifiers or terminals
//! - An edge `A -> B` means values produced by A are delivered to B
//!
//! Edge types are checked at compile time by the typed handles in
//! [`crate::flow`]; by the time an edge reaches this module it is just a pair
//! of [`NodeId`]s.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena indexed by [`NodeId`]. Edges never own anything,
//!    and no node is removed before its manager is dropped.
//!
//! 2. Both directions are stored: successors drive push propagation,
//!    predecessors drive pulls.
//!
//! 3. Edge sets are insertion ordered so that propagation order is
//!    deterministic.

mod node;
mod topology;

pub use node::{Behavior, Node, NodeId, NodeKind};
pub use topology::Topology;
