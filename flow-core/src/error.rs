//! Error types for the flow graph.
//!
//! Only programmer errors surface here: wiring a cycle, or a feedback loop of
//! posted acts that never settles. A transform that yields no value and a
//! cancelled async result are normal control flow and never become errors.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised by the flow manager.
#[derive(Error, Debug)]
pub enum FlowError {
    /// The requested edge would close a cycle. The graph is left unchanged.
    #[error("connecting {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    /// Posted acts kept posting new acts past the drain cap.
    #[error("posted acts did not settle after {rounds} drain rounds")]
    RunawayPostedActs { rounds: usize },

    /// The manager behind a post handle has been dropped.
    #[error("flow manager is closed")]
    Closed,

    /// The configuration could not be parsed.
    #[error("invalid flow configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_both_ends() {
        let err = FlowError::Cycle {
            from: NodeId::from(3),
            to: NodeId::from(1),
        };
        assert_eq!(err.to_string(), "connecting #3 -> #1 would create a cycle");
    }

    #[test]
    fn runaway_error_reports_rounds() {
        let err = FlowError::RunawayPostedActs { rounds: 64 };
        assert!(err.to_string().contains("64"));
    }
}
