//! Async Execution
//!
//! Async modifiers run their transform on a tokio blocking worker. The result
//! never touches the graph from the worker thread: it is sent back over a
//! completion channel and applied by the manager at the start of its next
//! `update()`. All node state is therefore only ever written from the thread
//! driving the manager, and two completions for the same node cannot
//! interleave.
//!
//! Each dispatch gets a fresh invocation id. The node remembers the id of its
//! current invocation and drops any completion carrying another id.
//!
//! A transform that panics still produces a completion, marked as panicked
//! and without output, so its node is never left waiting.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use crate::config::FlowConfig;
use crate::graph::NodeId;

/// A type-erased value travelling between nodes.
pub(crate) type Payload = Box<dyn Any + Send>;

/// Work shipped to a worker thread.
pub(crate) type Job = Box<dyn FnOnce() -> Option<Payload> + Send>;

/// Result of one async invocation, as received by the manager.
pub(crate) struct Completion {
    pub node: NodeId,
    pub invocation: u64,
    /// Data stamp of the input the invocation was started with.
    pub stamp: u64,
    pub output: Option<Payload>,
    /// The transform panicked; `output` is `None`.
    pub panicked: bool,
}

/// Owns the worker runtime and the completion channel.
pub(crate) struct Executor {
    worker_threads: usize,
    thread_name: String,

    /// Runtime built on first use, unless an external handle was supplied.
    runtime: Option<Runtime>,
    handle: Option<Handle>,

    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,

    next_invocation: u64,
    in_flight: usize,
}

impl Executor {
    pub fn new(config: &FlowConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            worker_threads: config.worker_threads.max(1),
            thread_name: config.thread_name.clone(),
            runtime: None,
            handle: None,
            completions_tx,
            completions_rx,
            next_invocation: 0,
            in_flight: 0,
        }
    }

    /// Use an existing runtime instead of building one.
    ///
    /// `settle` relies on the runtime's time driver.
    pub fn with_handle(config: &FlowConfig, handle: Handle) -> Self {
        let mut executor = Self::new(config);
        executor.handle = Some(handle);
        executor
    }

    fn handle(&mut self) -> std::io::Result<Handle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.worker_threads)
            .thread_name(self.thread_name.clone())
            .enable_time()
            .build()?;
        debug!(workers = self.worker_threads, "started flow worker runtime");

        let handle = runtime.handle().clone();
        self.runtime = Some(runtime);
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Run `job` on a worker and return its invocation id.
    ///
    /// If no runtime can be started the job runs inline; its completion is
    /// still delivered through the channel.
    pub fn spawn(&mut self, node: NodeId, stamp: u64, job: Job) -> u64 {
        let invocation = self.next_invocation;
        self.next_invocation += 1;
        self.in_flight += 1;

        let tx = self.completions_tx.clone();
        let task = move || {
            let (output, panicked) = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(output) => (output, false),
                Err(_) => {
                    error!(%node, invocation, "async transform panicked");
                    (None, true)
                }
            };
            // the receiver lives as long as the manager
            let _ = tx.send(Completion {
                node,
                invocation,
                stamp,
                output,
                panicked,
            });
        };

        match self.handle() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(err) => {
                error!(%node, %err, "cannot start worker runtime, running transform inline");
                task();
            }
        }

        invocation
    }

    /// Next completion that has already landed, if any.
    pub fn try_next(&mut self) -> Option<Completion> {
        let completion = self.completions_rx.try_recv().ok()?;
        self.in_flight -= 1;
        Some(completion)
    }

    /// Block until a completion lands or `timeout` passes.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async context.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<Completion> {
        if let Some(completion) = self.try_next() {
            return Some(completion);
        }
        let handle = self.handle.clone()?;
        let rx = &mut self.completions_rx;
        let completion = handle
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await })
            .ok()
            .flatten()?;
        self.in_flight -= 1;
        Some(completion)
    }

    /// Number of dispatched invocations whose completion has not been
    /// received yet, cancelled ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // do not wait for transforms that ignore their token
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_comes_back_through_the_channel() {
        let mut executor = Executor::new(&FlowConfig::default());
        let node = NodeId::from(7);

        let invocation = executor.spawn(node, 3, Box::new(|| Some(Box::new(21_i32) as Payload)));
        assert_eq!(executor.in_flight(), 1);

        let completion = executor.wait_next(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.node, node);
        assert_eq!(completion.invocation, invocation);
        assert_eq!(completion.stamp, 3);
        assert!(!completion.panicked);
        let value = completion.output.unwrap().downcast::<i32>().unwrap();
        assert_eq!(*value, 21);
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn invocation_ids_increase() {
        let mut executor = Executor::new(&FlowConfig::default());
        let node = NodeId::from(0);
        let first = executor.spawn(node, 0, Box::new(|| None));
        let second = executor.spawn(node, 0, Box::new(|| None));
        assert!(second > first);

        assert!(executor.wait_next(Duration::from_secs(5)).is_some());
        assert!(executor.wait_next(Duration::from_secs(5)).is_some());
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn panicking_job_still_completes() {
        let mut executor = Executor::new(&FlowConfig::default());
        let invocation = executor.spawn(
            NodeId::from(2),
            5,
            Box::new(|| -> Option<Payload> { panic!("transform blew up") }),
        );

        let completion = executor.wait_next(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.invocation, invocation);
        assert!(completion.panicked);
        assert!(completion.output.is_none());
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn nothing_to_wait_for_without_runtime() {
        let mut executor = Executor::new(&FlowConfig::default());
        assert!(executor.wait_next(Duration::from_millis(10)).is_none());
    }
}
