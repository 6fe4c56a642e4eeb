//! Modifier Implementation
//!
//! A modifier transforms values of type `In` arriving on its incoming edges
//! into values of type `Out` delivered to its successors.
//!
//! # Caching
//!
//! - **Transient** modifiers run their transform on every delivery and on
//!   every pull.
//! - **Argument-cached** modifiers remember the last argument and result. A
//!   new argument equal to the last one (by `PartialEq`) skips the transform:
//!   a push stops there, a pull returns the remembered result.
//!
//! # Execution
//!
//! Sync modifiers run the transform on the propagating thread. Async
//! modifiers hand it to a worker along with a cancellation token; a newer
//! input cancels the outstanding invocation before dispatching, and the
//! cancelled invocation's result is dropped when it lands. Async modifiers
//! keep their latest completed result so lazy consumers can pull it.
//!
//! A transform returning `None` is not an error: the cascade simply stops at
//! this modifier for that value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::erased::{Emit, ErasedNode, NodeCx};
use super::handle::FlowValue;
use super::worker::Payload;
use crate::graph::Behavior;

/// The computation performed by a modifier.
///
/// Long-running transforms should poll `token` and return early once it is
/// cancelled; whatever they return afterwards is discarded.
pub trait Transform<In, Out>: Send + Sync + 'static {
    fn apply(&self, token: &CancellationToken, input: &In) -> Option<Out>;
}

struct FnTransform<F>(F);

impl<In, Out, F> Transform<In, Out> for FnTransform<F>
where
    F: Fn(&CancellationToken, &In) -> Option<Out> + Send + Sync + 'static,
{
    fn apply(&self, token: &CancellationToken, input: &In) -> Option<Out> {
        (self.0)(token, input)
    }
}

/// Whether a modifier memoizes on its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Transient,
    ArgumentCached,
}

/// Where a modifier's transform runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// On the thread that propagates the value.
    #[default]
    Sync,

    /// On a worker thread, with cancellation.
    Async,
}

/// Description of a modifier, passed to `Manager::add_modifier`.
pub struct ModifierSpec<In, Out> {
    pub(crate) transform: Arc<dyn Transform<In, Out>>,
    pub(crate) same: Option<fn(&In, &In) -> bool>,
    pub(crate) execution: Execution,
    pub(crate) behavior: Behavior,
    pub(crate) label: Option<String>,
}

impl<In: FlowValue, Out: FlowValue> ModifierSpec<In, Out> {
    /// A transient modifier running `f` on every delivery.
    pub fn transient<F>(f: F) -> Self
    where
        F: Fn(&CancellationToken, &In) -> Option<Out> + Send + Sync + 'static,
    {
        Self::from_transform(FnTransform(f))
    }

    /// A transient modifier backed by a [`Transform`] implementation.
    pub fn from_transform(transform: impl Transform<In, Out>) -> Self {
        Self {
            transform: Arc::new(transform),
            same: None,
            execution: Execution::Sync,
            behavior: Behavior::Eager,
            label: None,
        }
    }

    /// Only flag this modifier on upstream changes; compute when pulled.
    pub fn lazy(self) -> Self {
        self.behavior(Behavior::Lazy)
    }

    /// Set the propagation behavior.
    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Run the transform on a worker thread.
    pub fn asynchronous(mut self) -> Self {
        self.execution = Execution::Async;
        self
    }

    /// Label the node in log output.
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<In: FlowValue + PartialEq, Out: FlowValue> ModifierSpec<In, Out> {
    /// An argument-cached modifier running `f` only for new arguments.
    pub fn cached<F>(f: F) -> Self
    where
        F: Fn(&CancellationToken, &In) -> Option<Out> + Send + Sync + 'static,
    {
        Self::transient(f).memoized()
    }

    /// Switch to argument caching.
    pub fn memoized(mut self) -> Self {
        self.same = Some(<In as PartialEq>::eq);
        self
    }
}

struct Invocation<In> {
    id: u64,
    token: CancellationToken,
    argument: In,
}

/// Outcome of offering an argument to a modifier.
enum Evaluation<Out> {
    /// The transform ran synchronously.
    Fresh(Option<Out>),

    /// The argument matched the cached one.
    Unchanged,

    /// The transform was handed to a worker.
    Dispatched,
}

/// Storage of a modifier node.
pub struct ModifierNode<In, Out> {
    transform: Arc<dyn Transform<In, Out>>,
    same: Option<fn(&In, &In) -> bool>,
    execution: Execution,

    last_argument: Option<In>,
    last_result: Option<Out>,

    in_flight: Option<Invocation<In>>,

    /// Transform runs, sync or dispatched.
    evaluations: u64,
}

impl<In: FlowValue, Out: FlowValue> ModifierNode<In, Out> {
    pub(crate) fn new(spec: ModifierSpec<In, Out>) -> Self {
        Self {
            transform: spec.transform,
            same: spec.same,
            execution: spec.execution,
            last_argument: None,
            last_result: None,
            in_flight: None,
            evaluations: 0,
        }
    }

    /// Get whether the modifier memoizes on its argument.
    pub fn cache_policy(&self) -> CachePolicy {
        match self.same {
            Some(_) => CachePolicy::ArgumentCached,
            None => CachePolicy::Transient,
        }
    }

    /// Get where the transform runs.
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Number of times the transform was run or dispatched.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// The remembered result, for argument-cached and async modifiers.
    pub fn last_result(&self) -> Option<&Out> {
        self.last_result.as_ref()
    }

    /// Check if an async invocation is outstanding.
    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    fn matches_last(&self, input: &In) -> bool {
        match (self.same, &self.last_argument) {
            (Some(same), Some(last)) => same(last, input),
            _ => false,
        }
    }

    fn matches_in_flight(&self, input: &In) -> bool {
        match (self.same, &self.in_flight) {
            (Some(same), Some(invocation)) => same(&invocation.argument, input),
            _ => false,
        }
    }

    fn cancel_in_flight(&mut self, cx: &NodeCx<'_>) {
        if let Some(invocation) = self.in_flight.take() {
            invocation.token.cancel();
            debug!(node = %cx.id, invocation = invocation.id, "cancelled outstanding invocation");
        }
    }

    fn evaluate(&mut self, input: &In, cx: &mut NodeCx<'_>) -> Evaluation<Out> {
        if self.matches_in_flight(input) {
            return Evaluation::Dispatched;
        }
        if self.matches_last(input) {
            // the result for this argument is already downstream
            self.cancel_in_flight(cx);
            trace!(node = %cx.id, "argument unchanged, skipping transform");
            return Evaluation::Unchanged;
        }

        match self.execution {
            Execution::Sync => {
                self.evaluations += 1;
                let output = self.transform.apply(&CancellationToken::new(), input);
                if self.same.is_some() {
                    self.last_argument = Some(input.clone());
                    self.last_result = output.clone();
                }
                Evaluation::Fresh(output)
            }
            Execution::Async => {
                self.dispatch(input.clone(), cx);
                Evaluation::Dispatched
            }
        }
    }

    fn dispatch(&mut self, argument: In, cx: &mut NodeCx<'_>) {
        self.cancel_in_flight(cx);
        self.evaluations += 1;

        let token = CancellationToken::new();
        let transform = Arc::clone(&self.transform);
        let job_token = token.clone();
        let job_argument = argument.clone();
        let id = cx.executor.spawn(
            cx.id,
            cx.stamp,
            Box::new(move || {
                transform
                    .apply(&job_token, &job_argument)
                    .map(|output| Box::new(output) as Payload)
            }),
        );

        trace!(node = %cx.id, invocation = id, "dispatched transform");
        self.in_flight = Some(Invocation {
            id,
            token,
            argument,
        });
    }

    fn remembered(&self) -> Option<Payload> {
        self.last_result
            .clone()
            .map(|output| Box::new(output) as Payload)
    }
}

impl<In: FlowValue, Out: FlowValue> ErasedNode for ModifierNode<In, Out> {
    fn accept(&mut self, input: &dyn Any, cx: &mut NodeCx<'_>) -> Emit {
        let Some(input) = input.downcast_ref::<In>() else {
            warn!(node = %cx.id, "modifier received a value of the wrong type");
            return Emit::Halt;
        };

        match self.evaluate(input, cx) {
            Evaluation::Fresh(Some(output)) => Emit::Forward(Box::new(output)),
            Evaluation::Fresh(None) | Evaluation::Unchanged => Emit::Halt,
            Evaluation::Dispatched => Emit::Pending,
        }
    }

    fn wants_input(&self, expired: bool) -> bool {
        match (self.execution, self.same) {
            (Execution::Sync, None) => true,
            (Execution::Sync, Some(_)) => expired || self.last_argument.is_none(),
            (Execution::Async, _) => {
                expired || (self.last_result.is_none() && self.in_flight.is_none())
            }
        }
    }

    fn serve(&mut self, input: Option<&dyn Any>, cx: &mut NodeCx<'_>) -> Option<Payload> {
        let Some(input) = input else {
            return self.remembered();
        };
        let Some(input) = input.downcast_ref::<In>() else {
            warn!(node = %cx.id, "modifier pulled a value of the wrong type");
            return None;
        };

        match self.evaluate(input, cx) {
            Evaluation::Fresh(output) => output.map(|output| Box::new(output) as Payload),
            Evaluation::Unchanged | Evaluation::Dispatched => self.remembered(),
        }
    }

    fn complete(&mut self, invocation: u64, output: Option<Payload>, panicked: bool) -> Emit {
        let current = match self.in_flight.take() {
            Some(current) if current.id == invocation && !current.token.is_cancelled() => current,
            other => {
                self.in_flight = other;
                trace!(invocation, "discarding stale async result");
                return Emit::Stale;
            }
        };
        if panicked {
            // nothing is remembered, so the same argument is dispatched again
            warn!(invocation = current.id, "async transform panicked, halting");
            return Emit::Halt;
        }

        let output = output
            .and_then(|payload| payload.downcast::<Out>().ok())
            .map(|output| *output);

        if self.same.is_some() {
            self.last_argument = Some(current.argument);
            self.last_result = output.clone();
        } else if output.is_some() {
            self.last_result = output.clone();
        }

        match output {
            Some(output) => Emit::Forward(Box::new(output)),
            None => Emit::Halt,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<In, Out> Drop for ModifierNode<In, Out> {
    fn drop(&mut self) {
        if let Some(invocation) = self.in_flight.take() {
            invocation.token.cancel();
        }
    }
}

impl<In, Out> fmt::Debug for ModifierNode<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierNode")
            .field("memoized", &self.same.is_some())
            .field("execution", &self.execution)
            .field("evaluations", &self.evaluations)
            .field("running", &self.in_flight.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::flow::worker::Executor;
    use crate::graph::NodeId;

    fn cx(executor: &mut Executor) -> NodeCx<'_> {
        NodeCx {
            id: NodeId::from(0),
            stamp: 1,
            executor,
        }
    }

    fn forwarded(emit: Emit) -> Option<i32> {
        match emit {
            Emit::Forward(payload) => payload.downcast::<i32>().ok().map(|v| *v),
            _ => None,
        }
    }

    #[test]
    fn transient_runs_every_time() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::transient(|_, v: &i32| Some(v * 2)));

        assert_eq!(forwarded(node.accept(&5, &mut cx(&mut executor))), Some(10));
        assert_eq!(forwarded(node.accept(&5, &mut cx(&mut executor))), Some(10));
        assert_eq!(node.evaluations(), 2);
        assert_eq!(node.cache_policy(), CachePolicy::Transient);
    }

    #[test]
    fn cached_skips_equal_argument() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::cached(|_, v: &i32| Some(-v)));

        assert_eq!(forwarded(node.accept(&3, &mut cx(&mut executor))), Some(-3));
        assert!(matches!(node.accept(&3, &mut cx(&mut executor)), Emit::Halt));
        assert_eq!(node.evaluations(), 1);

        assert_eq!(forwarded(node.accept(&4, &mut cx(&mut executor))), Some(-4));
        assert_eq!(node.evaluations(), 2);
        assert_eq!(node.last_result(), Some(&-4));
    }

    #[test]
    fn none_halts_the_cascade() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::transient(|_, s: &String| {
            s.parse::<i32>().ok()
        }));

        assert!(matches!(
            node.accept(&"abc".to_string(), &mut cx(&mut executor)),
            Emit::Halt
        ));
    }

    #[test]
    fn cached_serves_remembered_result_without_input() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::cached(|_, v: &i32| Some(v + 1)));

        assert!(node.wants_input(false));
        let payload = node.serve(Some(&1), &mut cx(&mut executor)).unwrap();
        assert_eq!(*payload.downcast::<i32>().unwrap(), 2);

        assert!(!node.wants_input(false));
        assert!(node.wants_input(true));
        let payload = node.serve(None, &mut cx(&mut executor)).unwrap();
        assert_eq!(*payload.downcast::<i32>().unwrap(), 2);
        assert_eq!(node.evaluations(), 1);
    }

    #[test]
    fn newer_dispatch_makes_older_completion_stale() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node =
            ModifierNode::new(ModifierSpec::transient(|_, v: &i32| Some(*v)).asynchronous());

        assert!(matches!(node.accept(&1, &mut cx(&mut executor)), Emit::Pending));
        let first = node.in_flight.as_ref().map(|i| i.id).unwrap();
        let first_token = node.in_flight.as_ref().map(|i| i.token.clone()).unwrap();

        assert!(matches!(node.accept(&2, &mut cx(&mut executor)), Emit::Pending));
        assert!(first_token.is_cancelled());
        let second = node.in_flight.as_ref().map(|i| i.id).unwrap();

        assert!(matches!(
            node.complete(first, Some(Box::new(1_i32)), false),
            Emit::Stale
        ));
        assert_eq!(forwarded(node.complete(second, Some(Box::new(2_i32)), false)), Some(2));
        assert_eq!(node.last_result(), Some(&2));
        assert!(!node.is_running());
    }

    #[test]
    fn stale_completion_leaves_cached_state_untouched() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node =
            ModifierNode::new(ModifierSpec::cached(|_, v: &i32| Some(v * 10)).asynchronous());

        node.accept(&1, &mut cx(&mut executor));
        let first = node.in_flight.as_ref().map(|i| i.id).unwrap();
        node.accept(&2, &mut cx(&mut executor));
        let second = node.in_flight.as_ref().map(|i| i.id).unwrap();

        assert!(matches!(
            node.complete(first, Some(Box::new(10_i32)), false),
            Emit::Stale
        ));
        assert_eq!(node.last_result(), None);
        assert!(node.last_argument.is_none());
        assert_eq!(node.in_flight.as_ref().map(|i| i.id), Some(second));

        // the cancelled argument was never memoized, so it is dispatched again
        assert!(node.serve(Some(&1), &mut cx(&mut executor)).is_none());
        assert_eq!(node.evaluations(), 3);
        assert!(node.is_running());
    }

    #[test]
    fn panicked_completion_clears_invocation_without_memoizing() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node =
            ModifierNode::new(ModifierSpec::cached(|_, v: &i32| Some(*v)).asynchronous());

        node.accept(&4, &mut cx(&mut executor));
        let id = node.in_flight.as_ref().map(|i| i.id).unwrap();

        assert!(matches!(node.complete(id, None, true), Emit::Halt));
        assert!(!node.is_running());
        assert!(node.last_argument.is_none());

        assert!(matches!(node.accept(&4, &mut cx(&mut executor)), Emit::Pending));
        assert_eq!(node.evaluations(), 2);
    }

    #[test]
    fn async_cached_does_not_redispatch_same_argument() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::cached(|_, v: &i32| Some(*v)).asynchronous());

        assert!(matches!(node.accept(&7, &mut cx(&mut executor)), Emit::Pending));
        assert!(matches!(node.accept(&7, &mut cx(&mut executor)), Emit::Pending));
        assert_eq!(node.evaluations(), 1);
    }

    struct Halve;

    impl Transform<u32, u32> for Halve {
        fn apply(&self, _token: &CancellationToken, input: &u32) -> Option<u32> {
            (input % 2 == 0).then(|| input / 2)
        }
    }

    #[test]
    fn transform_trait_objects_work() {
        let mut executor = Executor::new(&FlowConfig::default());
        let mut node = ModifierNode::new(ModifierSpec::from_transform(Halve));

        match node.accept(&8_u32, &mut cx(&mut executor)) {
            Emit::Forward(payload) => assert_eq!(*payload.downcast::<u32>().unwrap(), 4),
            _ => panic!("expected a forwarded value"),
        }
        assert!(matches!(node.accept(&3_u32, &mut cx(&mut executor)), Emit::Halt));
    }
}
