use chrono::{DateTime, Utc};

use super::module::{ModuleName, ModuleSet};
use crate::error::ErrorKind;

/// A full replacement of the canonical module set delivered from outside the store
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// The replacement set
    pub modules: ModuleSet,
    /// Where the set came from (a directory, a URL, ...)
    pub source: String,
    /// When the set was produced
    pub timestamp: DateTime<Utc>,
}

impl ReloadEvent {
    /// Create a reload event stamped with the current time
    pub fn new(modules: ModuleSet, source: impl Into<String>) -> Self {
        Self {
            modules,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// How a committed change affected a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Module was added
    Created,
    /// Module fields changed
    Updated,
    /// Module was removed
    Deleted,
}

/// Notification published by the store after its state changed.
///
/// Consumers re-read the views they care about; events carry no payload copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Lifecycle status changed
    StatusChanged,
    /// Canonical set was replaced by a load or reload
    CanonicalReplaced {
        /// Number of modules in the new set
        module_count: usize,
    },
    /// A single module was committed
    ModuleCommitted {
        /// The module
        name: ModuleName,
        /// What happened to it
        change: ChangeKind,
    },
    /// Selection changed
    SelectionChanged,
    /// Search query or filters changed
    SearchChanged,
    /// History cursor or length changed
    HistoryChanged,
    /// An error was recorded as the last error
    ErrorRaised {
        /// Category of the error
        kind: ErrorKind,
    },
}
