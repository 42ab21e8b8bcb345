//! Listener configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning knobs for the producer and consumer threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bytes requested from the source per read.
    pub chunk_size: usize,
    /// How long the consumer waits on the dispatch queue before re-checking
    /// the listener state. Bounds shutdown latency.
    pub poll_interval_ms: u64,
    /// Grow reads to the longest literal pattern a registered filter waits for.
    pub adaptive_reads: bool,
    /// Prefix for the worker thread names.
    pub thread_name: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            poll_interval_ms: 10,
            adaptive_reads: true,
            thread_name: "serial-listener".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::InvalidConfig {
            reason: format!("malformed listener config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidConfig {
                reason: "chunk_size must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig {
                reason: "poll_interval_ms must be at least 1".to_string(),
            });
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig {
                reason: "thread_name cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Consumer poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
