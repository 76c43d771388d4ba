//! YAML directory persistence for modgraph
//!
//! [`YamlDirectoryRepository`] implements the module repository over a
//! directory holding one YAML file per module. [`ModuleDirectoryWatcher`]
//! watches that directory and feeds reloaded sets to the store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Repository and watcher configuration
pub mod config;

/// Watcher errors
pub mod error;

/// Directory-backed module repository
pub mod repository;

/// Directory watcher
pub mod watcher;

pub use config::{WatcherConfig, YamlRepositoryConfig};
pub use error::WatchError;
pub use repository::{parse_module, YamlDirectoryRepository};
pub use watcher::ModuleDirectoryWatcher;
