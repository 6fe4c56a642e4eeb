//! Type-erased node interface used by the manager.
//!
//! The manager stores every node as a `Box<dyn ErasedNode>` and moves values
//! between them as `&dyn Any`. Edge types were checked when the edge was
//! connected, so a failed downcast means a handle was used with the wrong
//! manager.

use std::any::Any;

use super::worker::{Executor, Payload};
use crate::graph::NodeId;

/// What a node wants to happen after it handled a value.
pub(crate) enum Emit {
    /// Deliver this value to the node's successors.
    Forward(Payload),

    /// Stop the cascade at this node.
    Halt,

    /// Work was dispatched to a worker; its completion continues the cascade.
    Pending,

    /// An async completion that was superseded or cancelled.
    Stale,
}

/// Per-call context handed to a node.
pub(crate) struct NodeCx<'a> {
    pub id: NodeId,

    /// Data stamp of the value being processed.
    pub stamp: u64,

    pub executor: &'a mut Executor,
}

pub(crate) trait ErasedNode: Send {
    /// Handle a value pushed along an eager edge.
    fn accept(&mut self, input: &dyn Any, cx: &mut NodeCx<'_>) -> Emit;

    /// Whether serving a pull requires pulling this node's inputs first.
    fn wants_input(&self, expired: bool) -> bool;

    /// Produce this node's output for a downstream pull. `input` is the newest
    /// upstream value if [`wants_input`](Self::wants_input) asked for one.
    fn serve(&mut self, input: Option<&dyn Any>, cx: &mut NodeCx<'_>) -> Option<Payload>;

    /// Apply the result of an async invocation. A panicked invocation
    /// arrives with `panicked` set and no output.
    fn complete(&mut self, invocation: u64, output: Option<Payload>, panicked: bool) -> Emit;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
