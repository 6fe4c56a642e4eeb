//! Chain wiring.
//!
//! `connect_chain` wires an ordered list of nodes pairwise. Each step is type
//! checked: `then` only accepts a node whose input type matches the previous
//! node's output type. Nothing is connected until the chain is committed with
//! [`Chain::end`] or [`Chain::finish`], and a commit is all-or-nothing: if any
//! edge would close a cycle, the edges this chain already added are removed
//! again and the graph is left as it was.

use std::marker::PhantomData;

use super::Manager;
use crate::error::Result;
use crate::flow::{Downstream, Upstream};
use crate::graph::NodeId;

/// Pending chain whose last node produces `T`.
#[must_use = "a chain connects nothing until `end` or `finish` is called"]
pub struct Chain<'m, T> {
    manager: &'m mut Manager,
    edges: Vec<(NodeId, NodeId)>,
    tail: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<'m, T> Chain<'m, T> {
    pub(crate) fn start(manager: &'m mut Manager, head: NodeId) -> Self {
        Self {
            manager,
            edges: Vec::new(),
            tail: head,
            _marker: PhantomData,
        }
    }

    /// Append a node that consumes `T` and produces `U`.
    pub fn then<N, U>(mut self, next: N) -> Chain<'m, U>
    where
        N: Downstream<T> + Upstream<U>,
    {
        self.edges.push((self.tail, next.id()));
        Chain {
            manager: self.manager,
            edges: self.edges,
            tail: next.id(),
            _marker: PhantomData,
        }
    }

    /// Append a final node consuming `T` and connect the whole chain.
    pub fn end<N>(mut self, last: N) -> Result<()>
    where
        N: Downstream<T>,
    {
        self.edges.push((self.tail, last.id()));
        self.finish()
    }

    /// Connect the chain as built so far.
    pub fn finish(self) -> Result<()> {
        self.manager.connect_all(&self.edges)
    }
}
