//! Flow Core
//!
//! This crate provides the reactive flow graph that moves values from the
//! places they change to the places that display them. It implements:
//!
//! - Providers, modifiers and terminals connected by typed edges
//! - Eager (push) and lazy (pull on demand) propagation
//! - Transient and argument-cached modifiers
//! - Async modifiers with cooperative cancellation
//! - A manager that owns the graph and runs deferred acts once per tick
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node identity, edge sets, cycle rejection and expiry flags
//! - `flow`: Typed node storage, transforms, consumers and handles
//! - `manager`: Ownership, wiring, update ticks, push and pull propagation
//! - `config` / `error`: Configuration and the crate error type
//!
//! # Example
//!
//! ```rust,ignore
//! use flow_core::{Manager, ModifierSpec, Recorder, TerminalSpec};
//!
//! let mut manager = Manager::new();
//!
//! let text = manager.add_provider::<String>();
//! let parse = manager.add_modifier(ModifierSpec::transient(|_, s: &String| s.parse::<i32>().ok()));
//! let negate = manager.add_modifier(ModifierSpec::cached(|_, v: &i32| Some(-v)).lazy());
//! let label = manager.add_terminal(TerminalSpec::new(Recorder::new()));
//!
//! manager.connect_chain(text).then(parse).then(negate).end(label)?;
//!
//! manager.push_posted_act(move |m| m.update_value(text, "12".to_string()));
//! manager.update()?;
//!
//! // `negate` is lazy, so `label` is only flagged until it is pulled
//! assert!(manager.is_data_expired(label));
//! assert_eq!(manager.check_expired_and_update(label, true), Some(-12));
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod graph;
pub mod manager;

pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use flow::{
    CachePolicy, Consumer, Downstream, Execution, FlowValue, FnConsumer, ModifierNode,
    ModifierRef, ModifierSpec, NodeHandle, ProviderNode, ProviderRef, Recorder, TerminalMode,
    TerminalNode, TerminalRef, TerminalSpec, Transform, Upstream,
};
pub use graph::{Behavior, NodeId, NodeKind};
pub use manager::{Chain, Manager, PostHandle, PostedAct, TickReport};
pub use tokio_util::sync::CancellationToken;
