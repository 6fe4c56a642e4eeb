//! Push and pull propagation.
//!
//! # Push
//!
//! A node that produced a value hands it to each successor in edge order. An
//! eager successor processes it immediately and pushes its own output further
//! down; a lazy successor is only flagged, together with its descendants.
//!
//! # Pull
//!
//! Resolving a node walks up its predecessors. Each predecessor decides
//! whether it needs fresh input (`wants_input`): providers never do, an
//! argument-cached modifier only when expired, a sync transient modifier
//! always. When a node has several predecessors the value with the newest
//! data stamp wins.
//!
//! Every node is taken out of its slot while it runs and put back before its
//! output moves on, so a node is never borrowed twice. The graph is acyclic,
//! so a cascade never re-enters a node it is still running.
//!
//! Pushes run on an explicit stack. Pulls recurse once per hop upstream.

use std::any::Any;

use smallvec::SmallVec;
use tracing::{trace, warn};

use super::{Manager, TickReport};
use crate::flow::worker::{Completion, Payload};
use crate::flow::{Emit, ErasedNode, NodeCx};
use crate::graph::{Behavior, NodeId, NodeKind};

/// A node whose output is being handed to its successors.
struct Frame {
    from: NodeId,
    value: Payload,
    stamp: u64,
    successors: SmallVec<[NodeId; 8]>,
    /// Next successor to visit.
    cursor: usize,
}

/// A value resolved by a pull, with the stamp of the data it came from.
pub(super) struct Pulled {
    pub value: Payload,
    pub stamp: u64,
}

impl Manager {
    fn take_node(&mut self, id: NodeId) -> Option<Box<dyn ErasedNode>> {
        let node = self.slots.get_mut(id.index()).and_then(Option::take);
        if node.is_none() {
            warn!(node = %id, "node is unavailable, skipping");
        }
        node
    }

    fn restore_node(&mut self, id: NodeId, node: Box<dyn ErasedNode>) {
        self.slots[id.index()] = Some(node);
    }

    /// Hand `value`, produced by `from`, to every successor of `from`, and
    /// keep going with whatever eager successors produce.
    ///
    /// The cascade is depth first in edge order, driven by an explicit stack
    /// of frames so chain length is not bounded by the thread's stack.
    pub(super) fn propagate(&mut self, from: NodeId, value: Payload, stamp: u64) {
        let mut stack = vec![self.frame(from, value, stamp)];

        while let Some(frame) = stack.last_mut() {
            let Some(&next) = frame.successors.get(frame.cursor) else {
                stack.pop();
                continue;
            };
            frame.cursor += 1;
            let stamp = frame.stamp;

            let output = match self.topology.node(next).behavior() {
                Behavior::Eager => self.deliver(next, &*frame.value, stamp),
                Behavior::Lazy => {
                    let expired = self.topology.expire_from(next);
                    trace!(
                        from = %frame.from,
                        node = %next,
                        label = self.label(next),
                        newly_expired = expired.len(),
                        "lazy edge, expired"
                    );
                    None
                }
            };

            if let Some(output) = output {
                let frame = self.frame(next, output, stamp);
                stack.push(frame);
            }
        }
    }

    fn frame(&self, from: NodeId, value: Payload, stamp: u64) -> Frame {
        Frame {
            from,
            value,
            stamp,
            successors: self.topology.node(from).successors().iter().copied().collect(),
            cursor: 0,
        }
    }

    fn label(&self, id: NodeId) -> &str {
        self.topology.node(id).label().unwrap_or("")
    }

    /// Run `id` on a pushed value. Returns the output to push further down.
    fn deliver(&mut self, id: NodeId, value: &dyn Any, stamp: u64) -> Option<Payload> {
        let mut node = self.take_node(id)?;
        let emit = node.accept(
            value,
            &mut NodeCx {
                id,
                stamp,
                executor: &mut self.executor,
            },
        );
        self.restore_node(id, node);

        let record = self.topology.node_mut(id);
        record.clear_expired();
        record.set_stamp(stamp);

        match emit {
            Emit::Forward(output) => Some(output),
            Emit::Halt => {
                trace!(node = %id, label = self.label(id), "cascade stopped");
                None
            }
            Emit::Pending | Emit::Stale => None,
        }
    }

    /// Resolve the output of `id` for a downstream consumer.
    fn pull(&mut self, id: NodeId) -> Option<Pulled> {
        let expired = self.topology.node(id).is_expired();
        let wants_input = self.slots[id.index()]
            .as_ref()
            .is_some_and(|node| node.wants_input(expired));

        let input = if wants_input {
            self.pull_inputs(id)
        } else {
            None
        };
        let stamp = input
            .as_ref()
            .map_or(self.topology.node(id).stamp(), |input| input.stamp);

        let mut node = self.take_node(id)?;
        let output = node.serve(
            input.as_ref().map(|input| &*input.value as &dyn Any),
            &mut NodeCx {
                id,
                stamp,
                executor: &mut self.executor,
            },
        );
        self.restore_node(id, node);

        let record = self.topology.node_mut(id);
        record.clear_expired();
        record.set_stamp(stamp);

        output.map(|value| Pulled { value, stamp })
    }

    /// Pull every predecessor of `id` and keep the newest value.
    pub(super) fn pull_inputs(&mut self, id: NodeId) -> Option<Pulled> {
        let predecessors: SmallVec<[NodeId; 4]> =
            self.topology.node(id).predecessors().iter().copied().collect();

        let mut newest: Option<Pulled> = None;
        for predecessor in predecessors {
            if let Some(pulled) = self.pull(predecessor) {
                if newest.as_ref().map_or(true, |best| pulled.stamp > best.stamp) {
                    newest = Some(pulled);
                }
            }
        }
        newest
    }

    /// Recompute an eager node from its inputs and push the result.
    pub(super) fn refresh(&mut self, id: NodeId) {
        if self.topology.node(id).kind() == NodeKind::Provider {
            if let Some(pulled) = self.pull(id) {
                self.propagate(id, pulled.value, pulled.stamp);
            }
            return;
        }

        let Some(pulled) = self.pull_inputs(id) else {
            trace!(node = %id, label = self.label(id), "nothing upstream to refresh from");
            return;
        };
        if let Some(output) = self.deliver(id, &*pulled.value, pulled.stamp) {
            self.propagate(id, output, pulled.stamp);
        }
    }

    /// Apply the result of an async invocation and push it downstream.
    pub(super) fn apply_completion(&mut self, completion: Completion, report: &mut TickReport) {
        let Completion {
            node: id,
            invocation,
            stamp,
            output,
            panicked,
        } = completion;

        let Some(mut node) = self.take_node(id) else {
            return;
        };
        let emit = node.complete(invocation, output, panicked);
        self.restore_node(id, node);

        match emit {
            Emit::Stale => {
                trace!(node = %id, label = self.label(id), invocation, "completion discarded");
                report.completions_discarded += 1;
            }
            Emit::Forward(output) => {
                report.completions_applied += 1;
                self.topology.node_mut(id).set_stamp(stamp);
                self.propagate(id, output, stamp);
            }
            Emit::Halt | Emit::Pending => report.completions_applied += 1,
        }
    }
}
