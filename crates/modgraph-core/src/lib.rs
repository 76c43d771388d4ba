//!
//! Modgraph Core - client-side state engine for module dependency graphs
//!
//! This crate defines the module data model, the repository boundary, and
//! the store that reconciles a repository-backed canonical module set with
//! local edits, undo/redo history, selection and search. Adapter crates
//! implement [`ModuleRepository`] over memory, YAML files or HTTP.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - module model, repository trait, events, graph analysis
pub mod domain;

/// Application layer - search index, selection, history and the store
pub mod application;

/// Store configuration
pub mod config;

/// Error types
pub mod error;

// Re-export key types
pub use config::StoreConfig;
pub use error::{
    BulkFailure, ErrorKind, RepositoryError, RepositoryErrorKind, StoreError, SurrogateError,
};

pub use domain::events::{ChangeKind, ReloadEvent, StoreEvent};
pub use domain::graph::{CycleError, DependencyGraph, IntegrityWarning, ModuleStatistics};
pub use domain::module::{
    Module, ModuleName, ModulePatch, ModuleSet, ModuleStatus, ModuleValidationError,
};
pub use domain::repository::ModuleRepository;

pub use application::history::{Command, CommandHistory, CommandId, CommandKind, ModuleChange};
pub use application::search::{compute_visible, SearchState, StructuredFilter};
pub use application::selection::SelectionManager;
pub use application::store::{ConnectionStatus, ModuleGraphStore, ReloadOutcome, StoreStatus};
pub use application::surrogate::{
    ExecutionInfo, MockLlmSurrogate, StaticStubSurrogate, Surrogate, SurrogateFactory,
    SurrogateInfo, SurrogateRegistry, SurrogateRequest, SurrogateRun, MOCK_LLM, STATIC_STUB,
};
