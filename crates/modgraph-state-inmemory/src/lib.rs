//! In-memory module repository for modgraph
//!
//! This crate provides an in-memory implementation of the `ModuleRepository`
//! trait defined in modgraph-core, plus a provider that shares its storage,
//! injects failures and publishes reload events the way a file watcher would.
//! It is primarily useful for development, testing, and demos.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

pub mod repositories;
pub use repositories::{FailureMap, InMemoryModuleRepository};

use modgraph_core::{
    Module, ModuleName, ModuleRepository, ModuleSet, ReloadEvent, RepositoryError,
    RepositoryErrorKind,
};

/// Provider for in-memory module repositories
pub struct InMemoryModuleStoreProvider {
    // Shared module storage
    modules: Arc<RwLock<ModuleSet>>,

    // Failures injected per module
    failures: Arc<RwLock<FailureMap>>,

    // Failure injected into load
    load_failure: Arc<RwLock<Option<RepositoryErrorKind>>>,

    // Artificial latency for every repository call
    latency: Option<Duration>,

    // Channel for reload events
    reload_tx: mpsc::Sender<ReloadEvent>,
    reload_rx: Option<mpsc::Receiver<ReloadEvent>>,
}

impl InMemoryModuleStoreProvider {
    /// Create a provider with empty storage
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(100);

        Self {
            modules: Arc::new(RwLock::new(ModuleSet::new())),
            failures: Arc::new(RwLock::new(FailureMap::new())),
            load_failure: Arc::new(RwLock::new(None)),
            latency: None,
            reload_tx: tx,
            reload_rx: Some(rx),
        }
    }

    /// Create a provider seeded with `modules`
    pub fn with_modules<I>(modules: I) -> Self
    where
        I: IntoIterator<Item = Module>,
    {
        let provider = Self::new();
        Self {
            modules: Arc::new(RwLock::new(modules.into_iter().collect())),
            ..provider
        }
    }

    /// Delay every call of repositories created afterwards
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Create a repository over the shared storage
    pub fn create_repository(&self) -> Arc<dyn ModuleRepository> {
        let repository = InMemoryModuleRepository::new(
            self.modules.clone(),
            self.failures.clone(),
            self.load_failure.clone(),
        );
        match self.latency {
            Some(latency) => Arc::new(repository.with_latency(latency)),
            None => Arc::new(repository),
        }
    }

    /// Take the receiving end of the reload channel.
    ///
    /// Returns `None` once taken.
    pub fn take_reload_receiver(&mut self) -> Option<mpsc::Receiver<ReloadEvent>> {
        self.reload_rx.take()
    }

    /// Make every call for `name` fail with `kind`
    pub async fn fail_on(&self, name: impl Into<ModuleName>, kind: RepositoryErrorKind) {
        self.failures.write().await.insert(name.into(), kind);
    }

    /// Remove an injected failure
    pub async fn recover(&self, name: &str) {
        self.failures.write().await.remove(name);
    }

    /// Make `load` fail with `kind`, or succeed again with `None`
    pub async fn fail_load(&self, kind: Option<RepositoryErrorKind>) {
        *self.load_failure.write().await = kind;
    }

    /// Current contents of the storage
    pub async fn snapshot(&self) -> ModuleSet {
        self.modules.read().await.clone()
    }

    /// Replace the storage from outside the repository and publish a reload,
    /// the way an on-disk edit reaches the store
    pub async fn replace_modules(&self, modules: ModuleSet) -> Result<(), RepositoryError> {
        *self.modules.write().await = modules.clone();
        debug!(module_count = modules.len(), "Publishing external reload");
        self.reload_tx
            .send(ReloadEvent::new(modules, "memory"))
            .await
            .map_err(|_| RepositoryError::transport("Reload channel closed"))
    }
}

impl Default for InMemoryModuleStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgraph_core::ModuleStatus;

    #[tokio::test]
    async fn test_repositories_share_storage() {
        let provider = InMemoryModuleStoreProvider::with_modules(vec![Module::new(
            "A",
            "first",
            ModuleStatus::Placeholder,
        )]);
        let first = provider.create_repository();
        let second = provider.create_repository();

        first
            .create(&Module::new("B", "second", ModuleStatus::Implemented))
            .await
            .unwrap();
        assert_eq!(second.load().await.unwrap().len(), 2);
        assert_eq!(provider.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_modules_publishes_reload() {
        let mut provider = InMemoryModuleStoreProvider::new();
        let mut rx = provider.take_reload_receiver().unwrap();
        assert!(provider.take_reload_receiver().is_none());

        let set: ModuleSet = vec![Module::new("Z", "external", ModuleStatus::Error)].into();
        provider.replace_modules(set.clone()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.modules, set);
        assert_eq!(event.source, "memory");
        assert_eq!(provider.snapshot().await, set);
    }

    #[tokio::test]
    async fn test_fail_on_and_recover() {
        let provider = InMemoryModuleStoreProvider::with_modules(vec![Module::new(
            "A",
            "first",
            ModuleStatus::Placeholder,
        )]);
        let repo = provider.create_repository();

        provider.fail_on("A", RepositoryErrorKind::Conflict).await;
        let err = repo.delete(&"A".into()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Conflict);

        provider.recover("A").await;
        repo.delete(&"A".into()).await.unwrap();
    }
}
