//! Configuration for the module graph store

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of commands kept in the undo/redo history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Capacity of the store event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_history_limit() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(limit) = lookup("MODGRAPH_HISTORY_LIMIT") {
            match limit.parse::<usize>() {
                Ok(limit) if limit > 0 => config.history_limit = limit,
                _ => warn!("Invalid MODGRAPH_HISTORY_LIMIT value: {}", limit),
            }
        }

        if let Some(capacity) = lookup("MODGRAPH_EVENT_CAPACITY") {
            match capacity.parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.event_capacity = capacity,
                _ => warn!("Invalid MODGRAPH_EVENT_CAPACITY value: {}", capacity),
            }
        }

        config
    }
}
