//! Manager configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use serde::Deserialize;

use crate::error::Result;

/// Tunables for a [`Manager`](crate::Manager).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Maximum number of drain rounds per `update()`. Acts posted while a
    /// round runs are executed in the next round of the same tick.
    pub max_drain_rounds: usize,

    /// Worker threads for the runtime that executes async transforms.
    /// Ignored when the manager is given an external runtime handle.
    pub worker_threads: usize,

    /// Name given to worker threads.
    pub thread_name: String,
}

impl FlowConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_drain_rounds: 64,
            worker_threads: 2,
            thread_name: "flow-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowError;

    #[test]
    fn empty_object_uses_defaults() {
        let config = FlowConfig::from_json("{}").unwrap();
        assert_eq!(config, FlowConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = FlowConfig::from_json(r#"{ "max_drain_rounds": 8 }"#).unwrap();
        assert_eq!(config.max_drain_rounds, 8);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.thread_name, "flow-worker");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = FlowConfig::from_json("{ max_drain_rounds: ").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
