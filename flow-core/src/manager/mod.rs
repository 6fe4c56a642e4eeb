//! Flow Manager
//!
//! The manager is the single owner of a flow graph. It connects providers,
//! modifiers and terminals, and drives updates.
//!
//! # How It Works
//!
//! 1. Nodes are added through the manager, which stores them in an arena and
//!    hands back typed handles.
//!
//! 2. Outside code either calls `update_value` directly or posts an act that
//!    will call it during the next tick.
//!
//! 3. `update()` runs one tick:
//!    a. Apply async results that landed since the last tick
//!    b. Run posted acts in FIFO order, including acts they post themselves
//!    c. Eager deliveries happen synchronously inside `update_value`; lazy
//!       nodes stay flagged until somebody pulls them
//!
//! # Thread Safety
//!
//! The manager is `Send` but not shared: every graph mutation happens on the
//! thread that owns it. Other threads talk to it through a [`PostHandle`], and
//! async transforms report back through a completion channel that the manager
//! drains itself.

mod chain;
mod posted;
mod propagation;

pub use chain::Chain;
pub use posted::{PostHandle, PostedAct};

use std::fmt;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, debug_span, error};

use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::flow::worker::Executor;
use crate::flow::{
    Consumer, Downstream, ErasedNode, FlowValue, ModifierNode, ModifierRef, ModifierSpec,
    NodeHandle, ProviderNode, ProviderRef, TerminalNode, TerminalRef, TerminalSpec, Upstream,
};
use crate::graph::{Behavior, NodeId, NodeKind, Topology};
use posted::ActQueue;

/// What one `update()` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Posted acts executed.
    pub acts_run: usize,

    /// Drain rounds used. Acts posted by acts run in the next round.
    pub rounds: usize,

    /// Async results applied to their node.
    pub completions_applied: usize,

    /// Async results dropped because they were cancelled or superseded.
    pub completions_discarded: usize,
}

/// Owner of a flow graph.
pub struct Manager {
    config: FlowConfig,
    topology: Topology,

    /// Node storage, parallel to `topology`. A slot is empty only while its
    /// node is being called.
    slots: Vec<Option<Box<dyn ErasedNode>>>,

    acts: ActQueue,
    executor: Executor,

    /// Data clock, advanced by every `update_value`.
    clock: u64,
}

impl Manager {
    /// Create a manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    /// Create a manager. No threads are started until an async modifier first
    /// dispatches work.
    pub fn with_config(config: FlowConfig) -> Self {
        let executor = Executor::new(&config);
        Self::from_parts(config, executor)
    }

    /// Create a manager that runs async transforms on an existing runtime.
    pub fn with_runtime(config: FlowConfig, handle: Handle) -> Self {
        let executor = Executor::with_handle(&config, handle);
        Self::from_parts(config, executor)
    }

    fn from_parts(config: FlowConfig, executor: Executor) -> Self {
        Self {
            config,
            topology: Topology::new(),
            slots: Vec::new(),
            acts: ActQueue::new(),
            executor,
            clock: 0,
        }
    }

    /// Get the configuration this manager was built with.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Read-only view of the graph's connectivity and expiry flags.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.topology.node_count()
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    fn insert(
        &mut self,
        kind: NodeKind,
        behavior: Behavior,
        label: Option<String>,
        node: Box<dyn ErasedNode>,
    ) -> NodeId {
        let id = self.topology.add_node(kind, behavior);
        debug!(node = %id, ?kind, ?behavior, label = label.as_deref(), "node added");
        if let Some(label) = label {
            self.topology.node_mut(id).set_label(label);
        }
        self.slots.push(Some(node));
        id
    }

    /// Add an empty provider.
    pub fn add_provider<T: FlowValue>(&mut self) -> ProviderRef<T> {
        let node = Box::new(ProviderNode::<T>::new(None));
        ProviderRef::new(self.insert(NodeKind::Provider, Behavior::Eager, None, node))
    }

    /// Add a provider holding `value`. Nothing is propagated.
    pub fn add_provider_with<T: FlowValue>(&mut self, value: T) -> ProviderRef<T> {
        let node = Box::new(ProviderNode::new(Some(value)));
        ProviderRef::new(self.insert(NodeKind::Provider, Behavior::Eager, None, node))
    }

    /// Add a modifier described by `spec`.
    pub fn add_modifier<In, Out>(&mut self, spec: ModifierSpec<In, Out>) -> ModifierRef<In, Out>
    where
        In: FlowValue,
        Out: FlowValue,
    {
        let behavior = spec.behavior;
        let label = spec.label.clone();
        let node = Box::new(ModifierNode::new(spec));
        ModifierRef::new(self.insert(NodeKind::Modifier, behavior, label, node))
    }

    /// Add a terminal described by `spec`.
    pub fn add_terminal<T, C>(&mut self, spec: TerminalSpec<T, C>) -> TerminalRef<T, C>
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        let TerminalSpec {
            consumer,
            mode,
            behavior,
            label,
            ..
        } = spec;
        let node = Box::new(TerminalNode::new(consumer, mode));
        TerminalRef::new(self.insert(NodeKind::Terminal, behavior, label, node))
    }

    fn typed<N: 'static>(&self, id: NodeId) -> &N {
        self.slots
            .get(id.index())
            .and_then(|slot| slot.as_deref())
            .and_then(|node| node.as_any().downcast_ref::<N>())
            .expect("node handle does not belong to this manager")
    }

    fn typed_mut<N: 'static>(&mut self, id: NodeId) -> &mut N {
        self.slots
            .get_mut(id.index())
            .and_then(|slot| slot.as_deref_mut())
            .and_then(|node| node.as_any_mut().downcast_mut::<N>())
            .expect("node handle does not belong to this manager")
    }

    /// Get a provider's storage.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to another manager.
    pub fn provider<T: FlowValue>(&self, provider: ProviderRef<T>) -> &ProviderNode<T> {
        self.typed(provider.id())
    }

    /// Get a modifier's storage.
    pub fn modifier<In, Out>(&self, modifier: ModifierRef<In, Out>) -> &ModifierNode<In, Out>
    where
        In: FlowValue,
        Out: FlowValue,
    {
        self.typed(modifier.id())
    }

    /// Get a terminal's storage.
    pub fn terminal<T, C>(&self, terminal: TerminalRef<T, C>) -> &TerminalNode<T, C>
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        self.typed(terminal.id())
    }

    /// Get a terminal's storage mutably.
    pub fn terminal_mut<T, C>(&mut self, terminal: TerminalRef<T, C>) -> &mut TerminalNode<T, C>
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        self.typed_mut(terminal.id())
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    /// Connect `from -> to`.
    ///
    /// Fails with [`FlowError::Cycle`] if `to` already reaches `from`; the
    /// graph is unchanged in that case. Connecting an existing edge is a no-op.
    pub fn connect_successor<T, A, B>(&mut self, from: A, to: B) -> Result<()>
    where
        A: Upstream<T>,
        B: Downstream<T>,
    {
        self.topology.add_edge(from.id(), to.id()).map(|_| ())
    }

    /// Remove `from -> to`. Returns `false` if there was no such edge.
    pub fn disconnect_successor(&mut self, from: impl NodeHandle, to: impl NodeHandle) -> bool {
        self.topology.remove_edge(from.id(), to.id())
    }

    /// Start wiring a chain at `head`.
    ///
    /// ```rust,ignore
    /// manager.connect_chain(provider).then(parse).then(negate).end(label)?;
    /// ```
    pub fn connect_chain<T, H: Upstream<T>>(&mut self, head: H) -> Chain<'_, T> {
        Chain::start(self, head.id())
    }

    pub(crate) fn connect_all(&mut self, edges: &[(NodeId, NodeId)]) -> Result<()> {
        let mut added = Vec::with_capacity(edges.len());
        for &(from, to) in edges {
            match self.topology.add_edge(from, to) {
                Ok(true) => added.push((from, to)),
                Ok(false) => {}
                Err(err) => {
                    for (from, to) in added.into_iter().rev() {
                        self.topology.remove_edge(from, to);
                    }
                    debug!(%err, "chain rejected, rolled back");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    /// Store a new value in `provider` and propagate it.
    ///
    /// Eager successors receive the value before this returns; lazy successors
    /// and everything below them are flagged as expired.
    pub fn update_value<T: FlowValue>(&mut self, provider: ProviderRef<T>, value: T) {
        self.clock += 1;
        let stamp = self.clock;
        let id = provider.id();

        self.typed_mut::<ProviderNode<T>>(id).store(value.clone());
        self.topology.node_mut(id).set_stamp(stamp);

        self.propagate(id, Box::new(value), stamp);
    }

    /// Get a provider's current value.
    pub fn value<T: FlowValue>(&self, provider: ProviderRef<T>) -> Option<&T> {
        self.provider(provider).value()
    }

    /// Get the number of values a provider has stored.
    pub fn generation<T: FlowValue>(&self, provider: ProviderRef<T>) -> u64 {
        self.provider(provider).generation()
    }

    /// Invalidate a node.
    ///
    /// A lazy node is flagged together with everything below it. An eager
    /// node resolves its inputs right away and delivers the result again; for
    /// a provider that means re-sending its current value.
    pub fn mark_expired(&mut self, node: impl NodeHandle) {
        let id = node.id();
        if self.topology.node(id).is_lazy() {
            self.topology.expire_from(id);
        } else {
            self.refresh(id);
        }
    }

    /// Check if any node is expired.
    pub fn is_expired(&self, node: impl NodeHandle) -> bool {
        self.topology.node(node.id()).is_expired()
    }

    /// Number of transform runs of `modifier`, sync or dispatched.
    pub fn evaluations<In, Out>(&self, modifier: ModifierRef<In, Out>) -> u64
    where
        In: FlowValue,
        Out: FlowValue,
    {
        self.modifier(modifier).evaluations()
    }

    // ------------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------------

    /// Whether an upstream change has not been resolved into `terminal` yet.
    pub fn is_data_expired<T, C>(&self, terminal: TerminalRef<T, C>) -> bool {
        self.topology.node(terminal.id()).is_expired()
    }

    /// Resolve `terminal` if it is expired or `force` is set.
    ///
    /// Resolving pulls the newest value from upstream, recomputing expired
    /// modifiers on the way, hands it to the consumer and clears the expired
    /// flag. Otherwise the cached value is returned (always `None` for a plain
    /// terminal).
    pub fn check_expired_and_update<T, C>(
        &mut self,
        terminal: TerminalRef<T, C>,
        force: bool,
    ) -> Option<T>
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        let id = terminal.id();
        if !(force || self.topology.node(id).is_expired()) {
            return self.terminal(terminal).cache().cloned();
        }

        let pulled = self.pull_inputs(id);
        self.topology.node_mut(id).clear_expired();

        let Some(pulled) = pulled else {
            return self.terminal(terminal).cache().cloned();
        };
        let value = match pulled.value.downcast::<T>() {
            Ok(value) => *value,
            Err(_) => {
                error!(node = %id, "terminal pulled a value of the wrong type");
                return None;
            }
        };

        self.topology.node_mut(id).set_stamp(pulled.stamp);
        self.terminal_mut(terminal).receive(&value);
        Some(value)
    }

    /// The terminal's value, resolving it only when expired or never resolved.
    ///
    /// Repeated calls without an upstream change return the cache and do not
    /// call the consumer again.
    pub fn request_cache<T, C>(&mut self, terminal: TerminalRef<T, C>) -> Option<T>
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        let cached = self.terminal(terminal).cache().cloned();
        if cached.is_some() && !self.is_data_expired(terminal) {
            return cached;
        }
        self.check_expired_and_update(terminal, true)
    }

    /// Number of times the terminal's consumer was called.
    pub fn update_count<T, C>(&self, terminal: TerminalRef<T, C>) -> u64
    where
        T: FlowValue,
        C: Consumer<T>,
    {
        self.terminal(terminal).update_count()
    }

    // ------------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------------

    /// Queue `act` for the next tick.
    pub fn push_posted_act<F>(&mut self, act: F)
    where
        F: FnOnce(&mut Manager) + Send + 'static,
    {
        self.acts.push(Box::new(act));
    }

    /// Handle for posting acts from other threads.
    pub fn poster(&self) -> PostHandle {
        self.acts.handle()
    }

    /// Acts waiting for the next tick, not counting ones still in transit
    /// from other threads.
    pub fn queued_acts(&self) -> usize {
        self.acts.len()
    }

    /// Run one tick.
    ///
    /// Fails with [`FlowError::RunawayPostedActs`] when acts keep posting new
    /// acts for more than `max_drain_rounds` rounds; the acts still queued at
    /// that point are dropped.
    pub fn update(&mut self) -> Result<TickReport> {
        let span = debug_span!("flow_update", nodes = self.node_count());
        let _enter = span.enter();

        let mut report = TickReport::default();

        while let Some(completion) = self.executor.try_next() {
            self.apply_completion(completion, &mut report);
        }

        self.acts.collect_remote();
        while !self.acts.is_empty() {
            if report.rounds == self.config.max_drain_rounds {
                let dropped = self.acts.clear();
                error!(rounds = report.rounds, dropped, "posted acts did not settle");
                return Err(FlowError::RunawayPostedActs {
                    rounds: report.rounds,
                });
            }

            report.rounds += 1;
            for act in self.acts.take_round() {
                act(self);
                report.acts_run += 1;
            }
        }

        debug!(?report, "tick finished");
        Ok(report)
    }

    /// Async invocations dispatched but not yet applied.
    pub fn in_flight(&self) -> usize {
        self.executor.in_flight()
    }

    /// Block until every outstanding async invocation has landed and been
    /// applied, or `timeout` passes. Returns `true` if nothing is left in
    /// flight.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async context.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut report = TickReport::default();

        while self.executor.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.executor.wait_next(remaining) {
                Some(completion) => self.apply_completion(completion, &mut report),
                None => return false,
            }
        }

        true
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("nodes", &self.node_count())
            .field("queued_acts", &self.acts.len())
            .field("in_flight", &self.executor.in_flight())
            .field("clock", &self.clock)
            .finish()
    }
}
