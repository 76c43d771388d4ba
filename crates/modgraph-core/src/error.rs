use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::domain::module::{ModuleName, ModuleValidationError};

/// Category of a repository failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Target module does not exist
    NotFound,
    /// Module shape or content is invalid
    ValidationFailed,
    /// Module changed externally or already exists
    Conflict,
    /// Network or IO failure, including timeouts
    Transport,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepositoryErrorKind::NotFound => "not found",
            RepositoryErrorKind::ValidationFailed => "validation failed",
            RepositoryErrorKind::Conflict => "conflict",
            RepositoryErrorKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Failure reported by a module repository
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Repository error ({kind}): {message}")]
pub struct RepositoryError {
    /// Failure category
    pub kind: RepositoryErrorKind,
    /// Human readable message
    pub message: String,
}

impl RepositoryError {
    /// Create a repository error
    pub fn new(kind: RepositoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Module not found
    pub fn not_found(name: impl fmt::Display) -> Self {
        Self::new(RepositoryErrorKind::NotFound, format!("Module {} not found", name))
    }

    /// Schema or content validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::ValidationFailed, message)
    }

    /// Conflicting external state
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::Conflict, message)
    }

    /// Network or IO failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::Transport, message)
    }
}

impl From<ModuleValidationError> for RepositoryError {
    fn from(err: ModuleValidationError) -> Self {
        RepositoryError::validation(err.to_string())
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::transport(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::validation(err.to_string())
    }
}

/// User-facing error taxonomy of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Bad module shape or content; the user must correct the input
    ValidationFailed,
    /// Stale selection or target
    NotFound,
    /// Concurrent external change, or an operation that cannot proceed yet
    Conflict,
    /// Network or IO failure; the user may retry
    Transport,
    /// Some operations of a bulk action failed
    PartialBulkFailure,
}

/// Failure creating or running a surrogate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurrogateError {
    /// No surrogate is registered under this name
    #[error("Surrogate type '{0}' not found")]
    UnknownSurrogate(String),

    /// Factory options did not match the surrogate's options
    #[error("Invalid options for surrogate '{surrogate}': {message}")]
    InvalidOptions {
        /// Surrogate name
        surrogate: String,
        /// What was wrong
        message: String,
    },

    /// Inputs were neither null nor a JSON object
    #[error("Surrogate inputs must be a JSON object, got {0}")]
    InvalidInputs(String),

    /// The prompt log could not be written
    #[error("Failed to write prompt log {path}: {message}")]
    PromptLog {
        /// Log file path
        path: String,
        /// IO error message
        message: String,
    },
}

/// One failed entity of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// Module the operation targeted
    pub name: ModuleName,
    /// Why it failed
    pub error: RepositoryError,
}

/// Error type of the module graph store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Repository round trip failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Target module is not in the canonical set
    #[error("Module not found: {0}")]
    NotFound(ModuleName),

    /// A mutation of this module is already in flight
    #[error("Module is busy: {0}")]
    Busy(ModuleName),

    /// A module with this name already exists
    #[error("Module already exists: {0}")]
    AlreadyExists(ModuleName),

    /// Bulk operation attempted without a multi-selection
    #[error("Bulk operation requires at least one selected module in multi-select mode")]
    EmptySelection,

    /// Some entities of a bulk operation failed
    #[error("{failed} of {attempted} operations failed")]
    PartialBulkFailure {
        /// Number of failed entities
        failed: usize,
        /// Number of entities attempted
        attempted: usize,
        /// Per-entity failures
        failures: Vec<BulkFailure>,
    },

    /// An undo or redo is in flight, or mutations block a history step
    #[error("History step in progress")]
    HistoryBusy,

    /// The store has not loaded a canonical set
    #[error("Store is not ready")]
    NotReady,

    /// A surrogate run failed
    #[error(transparent)]
    Surrogate(#[from] SurrogateError),
}

impl StoreError {
    /// Map onto the user-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Repository(err) => match err.kind {
                RepositoryErrorKind::NotFound => ErrorKind::NotFound,
                RepositoryErrorKind::ValidationFailed => ErrorKind::ValidationFailed,
                RepositoryErrorKind::Conflict => ErrorKind::Conflict,
                RepositoryErrorKind::Transport => ErrorKind::Transport,
            },
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_)
            | StoreError::Busy(_)
            | StoreError::HistoryBusy
            | StoreError::NotReady => ErrorKind::Conflict,
            StoreError::EmptySelection => ErrorKind::ValidationFailed,
            StoreError::PartialBulkFailure { .. } => ErrorKind::PartialBulkFailure,
            StoreError::Surrogate(SurrogateError::PromptLog { .. }) => ErrorKind::Transport,
            StoreError::Surrogate(_) => ErrorKind::ValidationFailed,
        }
    }

    pub(crate) fn from_failures(attempted: usize, failures: Vec<BulkFailure>) -> Self {
        StoreError::PartialBulkFailure {
            failed: failures.len(),
            attempted,
            failures,
        }
    }
}
