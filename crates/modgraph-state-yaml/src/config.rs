//! Configuration for the YAML directory adapter

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where module definitions live on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YamlRepositoryConfig {
    /// Directory holding one YAML file per module
    pub modules_dir: PathBuf,

    /// Create the directory when it does not exist yet
    #[serde(default)]
    pub create_dir: bool,
}

impl YamlRepositoryConfig {
    /// Config for an existing directory
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            create_dir: false,
        }
    }

    /// Create the directory on first use
    pub fn with_create_dir(mut self, create_dir: bool) -> Self {
        self.create_dir = create_dir;
        self
    }
}

/// Directory watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Quiet period after the last file event before reloading, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    1000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatcherConfig {
    /// The debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
