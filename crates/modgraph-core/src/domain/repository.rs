//! Repository trait for module persistence
//!
//! The store talks to persistence only through this trait. Adapter crates
//! implement it over memory, a directory of YAML files, or HTTP. Every call is
//! at-most-once from the caller's perspective: implementations do not retry.

use async_trait::async_trait;

use super::module::{Module, ModuleName, ModulePatch, ModuleSet};
use crate::error::RepositoryError;

/// Repository for module definitions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleRepository: Send + Sync {
    /// Load the full canonical module set
    async fn load(&self) -> Result<ModuleSet, RepositoryError>;

    /// Create a new module, returning the stored record
    async fn create(&self, module: &Module) -> Result<Module, RepositoryError>;

    /// Apply a partial update, returning the stored record
    async fn update(&self, name: &ModuleName, patch: &ModulePatch)
        -> Result<Module, RepositoryError>;

    /// Delete a module
    async fn delete(&self, name: &ModuleName) -> Result<(), RepositoryError>;
}
