//! Flow Nodes
//!
//! This module implements the three node roles of the flow graph and the
//! typed handles used to wire them.
//!
//! # Concepts
//!
//! ## Providers
//!
//! A provider holds a value. Storing a new value delivers it to eager
//! successors right away and flags lazy successors as expired.
//!
//! ## Modifiers
//!
//! A modifier transforms an input value into an output value. Transient
//! modifiers always recompute; argument-cached modifiers only recompute when
//! the input differs from the last one. Either kind can run its transform on a
//! worker thread with a cancellation token.
//!
//! ## Terminals
//!
//! A terminal consumes values. Eager terminals are called as soon as a value
//! reaches them; lazy terminals are only flagged as expired and resolve their
//! value when pulled.
//!
//! # Eager and Lazy
//!
//! Behavior belongs to the receiving node. A value travelling along an edge
//! into an eager node is processed immediately; into a lazy node, it only
//! flags that node and everything below it as expired. A later pull walks back
//! up the graph, recomputing only what it has to.

mod erased;
mod handle;
mod modifier;
mod provider;
mod terminal;
pub(crate) mod worker;

pub(crate) use erased::{Emit, ErasedNode, NodeCx};
pub use handle::{
    Downstream, FlowValue, ModifierRef, NodeHandle, ProviderRef, TerminalRef, Upstream,
};
pub use modifier::{CachePolicy, Execution, ModifierNode, ModifierSpec, Transform};
pub use provider::ProviderNode;
pub use terminal::{Consumer, FnConsumer, Recorder, TerminalMode, TerminalNode, TerminalSpec};
