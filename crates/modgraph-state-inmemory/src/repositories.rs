use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use modgraph_core::{
    Module, ModuleName, ModulePatch, ModuleRepository, ModuleSet, RepositoryError,
    RepositoryErrorKind,
};

/// Failures injected per module name
pub type FailureMap = HashMap<ModuleName, RepositoryErrorKind>;

/// In-memory implementation of the ModuleRepository
pub struct InMemoryModuleRepository {
    modules: Arc<RwLock<ModuleSet>>,
    failures: Arc<RwLock<FailureMap>>,
    load_failure: Arc<RwLock<Option<RepositoryErrorKind>>>,
    latency: Option<Duration>,
}

impl InMemoryModuleRepository {
    /// Create a new in-memory module repository over shared storage
    pub fn new(
        modules: Arc<RwLock<ModuleSet>>,
        failures: Arc<RwLock<FailureMap>>,
        load_failure: Arc<RwLock<Option<RepositoryErrorKind>>>,
    ) -> Self {
        Self {
            modules,
            failures,
            load_failure,
            latency: None,
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn check_injected(&self, name: &ModuleName) -> Result<(), RepositoryError> {
        match self.failures.read().await.get(name) {
            Some(kind) => {
                warn!(module = %name, kind = %kind, "Injected repository failure");
                Err(RepositoryError::new(
                    *kind,
                    format!("Injected failure for module {}", name),
                ))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn load(&self) -> Result<ModuleSet, RepositoryError> {
        self.pause().await;
        if let Some(kind) = *self.load_failure.read().await {
            return Err(RepositoryError::new(kind, "Injected load failure"));
        }
        let modules = self.modules.read().await;
        debug!(module_count = modules.len(), "Loaded modules from memory");
        Ok(modules.clone())
    }

    async fn create(&self, module: &Module) -> Result<Module, RepositoryError> {
        self.pause().await;
        self.check_injected(&module.name).await?;
        module.validate()?;

        let mut modules = self.modules.write().await;
        if modules.contains(module.name.as_str()) {
            return Err(RepositoryError::conflict(format!(
                "Module {} already exists",
                module.name
            )));
        }
        modules.insert(module.clone());
        debug!(module = %module.name, "Created module");
        Ok(module.clone())
    }

    async fn update(
        &self,
        name: &ModuleName,
        patch: &ModulePatch,
    ) -> Result<Module, RepositoryError> {
        self.pause().await;
        self.check_injected(name).await?;

        let mut modules = self.modules.write().await;
        let current = modules
            .get(name.as_str())
            .ok_or_else(|| RepositoryError::not_found(name))?;
        let updated = patch.apply(current);
        updated.validate()?;
        modules.insert(updated.clone());
        debug!(module = %name, "Updated module");
        Ok(updated)
    }

    async fn delete(&self, name: &ModuleName) -> Result<(), RepositoryError> {
        self.pause().await;
        self.check_injected(name).await?;

        let mut modules = self.modules.write().await;
        match modules.remove(name.as_str()) {
            Some(_) => {
                debug!(module = %name, "Deleted module");
                Ok(())
            }
            None => Err(RepositoryError::not_found(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgraph_core::ModuleStatus;
    use tokio_test::{assert_err, assert_ok};

    fn repository(modules: Vec<Module>) -> InMemoryModuleRepository {
        InMemoryModuleRepository::new(
            Arc::new(RwLock::new(modules.into())),
            Arc::new(RwLock::new(FailureMap::new())),
            Arc::new(RwLock::new(None)),
        )
    }

    fn module(name: &str) -> Module {
        Module::new(name, "test module", ModuleStatus::Placeholder)
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let repo = repository(vec![module("A")]);
        assert_ok!(repo.create(&module("B")).await);

        let loaded = repo.load().await.unwrap();
        let names: Vec<_> = loaded.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_create_existing_is_conflict() {
        let repo = repository(vec![module("A")]);
        let err = repo.create(&module("A")).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_invalid_is_validation_failure() {
        let repo = repository(vec![]);
        let err = repo.create(&module("9lives")).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let repo = repository(vec![module("A").with_version("1.0.0")]);
        let updated = repo
            .update(&"A".into(), &ModulePatch::status(ModuleStatus::Implemented))
            .await
            .unwrap();
        assert_eq!(updated.status, ModuleStatus::Implemented);
        assert_eq!(updated.version.as_deref(), Some("1.0.0"));

        let err = repo
            .update(&"Missing".into(), &ModulePatch::status(ModuleStatus::Error))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repository(vec![module("A")]);
        assert_ok!(repo.delete(&"A".into()).await);
        let err = repo.delete(&"A".into()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let failures = Arc::new(RwLock::new(FailureMap::new()));
        let load_failure = Arc::new(RwLock::new(None));
        let repo = InMemoryModuleRepository::new(
            Arc::new(RwLock::new(vec![module("A")].into())),
            failures.clone(),
            load_failure.clone(),
        );

        failures
            .write()
            .await
            .insert("A".into(), RepositoryErrorKind::Transport);
        let err = repo.delete(&"A".into()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Transport);

        *load_failure.write().await = Some(RepositoryErrorKind::Transport);
        assert_err!(repo.load().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let repo = repository(vec![module("A")]).with_latency(Duration::from_millis(250));
        let started = tokio::time::Instant::now();
        assert_ok!(repo.load().await);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
