//! Terminal Implementation
//!
//! A terminal is a sink: the place where values leave the flow graph and
//! reach the outside world (a label's text, a test harness's history).
//!
//! # Delivery
//!
//! The terminal's [`Consumer`] is called synchronously:
//!
//! - when an eager delivery reaches the terminal, or
//! - when a pull (`check_expired_and_update` / `request_cache`) resolves to a
//!   value.
//!
//! A cached terminal additionally keeps the last value it received, which is
//! what `request_cache` hands back when nothing upstream changed.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use tracing::warn;

use super::erased::{Emit, ErasedNode, NodeCx};
use super::handle::FlowValue;
use super::worker::Payload;
use crate::graph::Behavior;

/// Receives the values delivered to a terminal.
pub trait Consumer<T>: Send + 'static {
    fn on_update(&mut self, value: &T);
}

/// Adapts a closure into a [`Consumer`].
pub struct FnConsumer<F>(F);

impl<T, F> Consumer<T> for FnConsumer<F>
where
    F: FnMut(&T) + Send + 'static,
{
    fn on_update(&mut self, value: &T) {
        (self.0)(value)
    }
}

/// A consumer that keeps every value it receives.
#[derive(Debug, Clone)]
pub struct Recorder<T> {
    history: Vec<T>,
}

impl<T> Recorder<T> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Get every value received, oldest first.
    pub fn history(&self) -> &[T] {
        &self.history
    }

    /// Get the most recent value.
    pub fn last(&self) -> Option<&T> {
        self.history.last()
    }

    /// Forget the recorded history.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FlowValue> Consumer<T> for Recorder<T> {
    fn on_update(&mut self, value: &T) {
        self.history.push(value.clone());
    }
}

/// Whether a terminal keeps the last delivered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    #[default]
    Plain,
    Cached,
}

/// Description of a terminal, passed to `Manager::add_terminal`.
pub struct TerminalSpec<T, C> {
    pub(crate) consumer: C,
    pub(crate) mode: TerminalMode,
    pub(crate) behavior: Behavior,
    pub(crate) label: Option<String>,
    _marker: PhantomData<fn(T)>,
}

impl<T: FlowValue, C: Consumer<T>> TerminalSpec<T, C> {
    /// A plain, eager terminal.
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            mode: TerminalMode::Plain,
            behavior: Behavior::Eager,
            label: None,
            _marker: PhantomData,
        }
    }

    /// Keep the last delivered value.
    pub fn cached(mut self) -> Self {
        self.mode = TerminalMode::Cached;
        self
    }

    /// Only flag this terminal on upstream changes; resolve when pulled.
    pub fn lazy(self) -> Self {
        self.behavior(Behavior::Lazy)
    }

    /// Set the propagation behavior.
    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Label the node in log output.
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<T, F> TerminalSpec<T, FnConsumer<F>>
where
    T: FlowValue,
    F: FnMut(&T) + Send + 'static,
{
    /// A plain, eager terminal calling `f` for every value.
    pub fn from_fn(f: F) -> Self {
        Self::new(FnConsumer(f))
    }
}

/// Storage of a terminal node.
pub struct TerminalNode<T, C> {
    consumer: C,
    mode: TerminalMode,
    cache: Option<T>,
    update_count: u64,
}

impl<T: FlowValue, C: Consumer<T>> TerminalNode<T, C> {
    pub(crate) fn new(consumer: C, mode: TerminalMode) -> Self {
        Self {
            consumer,
            mode,
            cache: None,
            update_count: 0,
        }
    }

    pub(crate) fn receive(&mut self, value: &T) {
        self.consumer.on_update(value);
        self.update_count += 1;
        if self.mode == TerminalMode::Cached {
            self.cache = Some(value.clone());
        }
    }

    /// Get the consumer.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Get the consumer mutably.
    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    /// The last delivered value. Always `None` for plain terminals.
    pub fn cache(&self) -> Option<&T> {
        self.cache.as_ref()
    }

    /// Number of times the consumer was called.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Get whether the terminal caches.
    pub fn mode(&self) -> TerminalMode {
        self.mode
    }
}

impl<T: FlowValue, C: Consumer<T>> ErasedNode for TerminalNode<T, C> {
    fn accept(&mut self, input: &dyn Any, cx: &mut NodeCx<'_>) -> Emit {
        match input.downcast_ref::<T>() {
            Some(value) => self.receive(value),
            None => warn!(node = %cx.id, "terminal received a value of the wrong type"),
        }
        Emit::Halt
    }

    fn wants_input(&self, _expired: bool) -> bool {
        true
    }

    fn serve(&mut self, _input: Option<&dyn Any>, _cx: &mut NodeCx<'_>) -> Option<Payload> {
        // terminals have no outgoing edges
        None
    }

    fn complete(&mut self, _invocation: u64, _output: Option<Payload>, _panicked: bool) -> Emit {
        Emit::Halt
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: fmt::Debug, C> fmt::Debug for TerminalNode<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalNode")
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .field("update_count", &self.update_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::FlowConfig;
    use crate::flow::worker::Executor;
    use crate::graph::NodeId;

    #[test]
    fn cached_terminal_keeps_last_value() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut cx = NodeCx {
            id: NodeId::from(0),
            stamp: 0,
            executor: &mut executor,
        };
        let mut node = TerminalNode::new(Recorder::<i32>::new(), TerminalMode::Cached);

        node.accept(&1, &mut cx);
        node.accept(&2, &mut cx);

        assert_eq!(node.cache(), Some(&2));
        assert_eq!(node.update_count(), 2);
        assert_eq!(node.consumer().history(), &[1, 2]);
    }

    #[test]
    fn plain_terminal_keeps_nothing() {
        let mut node = TerminalNode::new(Recorder::<i32>::new(), TerminalMode::Plain);
        node.receive(&5);
        assert_eq!(node.mode(), TerminalMode::Plain);
        assert!(node.cache().is_none());
        assert_eq!(node.consumer().last(), Some(&5));
    }

    #[test]
    fn fn_consumer_sees_values() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut consumer = FnConsumer(move |v: &String| sink.lock().push(v.len()));

        consumer.on_update(&"abc".to_string());
        assert_eq!(*seen.lock(), vec![3]);
    }
}
