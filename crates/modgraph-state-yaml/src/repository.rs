//! Module repository over a directory of YAML files
//!
//! Each module lives in its own file. Loading reads every `.yaml` and `.yml`
//! file in the directory (not recursively) in file name order and skips
//! empty documents. New modules are written to `<name>.yaml`; updates and
//! deletes act on whichever file currently defines the module.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use modgraph_core::{Module, ModuleName, ModulePatch, ModuleRepository, ModuleSet, RepositoryError};

use crate::config::YamlRepositoryConfig;

/// File extensions treated as module definitions
pub(crate) const YAML_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Whether `path` names a module definition file
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            YAML_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Parse one module definition file.
///
/// Returns `Ok(None)` for an empty document. Parse failures and schema
/// violations are reported as validation errors naming the file.
pub fn parse_module(path: &Path, contents: &str) -> Result<Option<Module>, RepositoryError> {
    let document: serde_yaml::Value = serde_yaml::from_str(contents).map_err(|e| {
        RepositoryError::validation(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    if document.is_null() {
        return Ok(None);
    }

    let module: Module = serde_yaml::from_value(document).map_err(|e| {
        RepositoryError::validation(format!("Invalid module in {}: {}", path.display(), e))
    })?;
    module.validate().map_err(|e| {
        RepositoryError::validation(format!("{} in {}", e, path.display()))
    })?;
    Ok(Some(module))
}

fn io_error(path: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::transport(format!("{}: {}", path.display(), err))
}

async fn write_module(path: &Path, module: &Module) -> Result<(), RepositoryError> {
    let yaml = serde_yaml::to_string(module).map_err(|e| {
        RepositoryError::validation(format!("Failed to serialize module {}: {}", module.name, e))
    })?;

    // Write beside the target and rename so readers never see a partial file
    let staging = path.with_extension("yaml.tmp");
    fs::write(&staging, yaml)
        .await
        .map_err(|e| io_error(&staging, e))?;
    fs::rename(&staging, path)
        .await
        .map_err(|e| io_error(path, e))
}

/// Repository storing one module per YAML file
#[derive(Debug, Clone)]
pub struct YamlDirectoryRepository {
    config: YamlRepositoryConfig,
}

impl YamlDirectoryRepository {
    /// Open the modules directory, creating it when configured to
    pub fn new(config: YamlRepositoryConfig) -> Result<Self, RepositoryError> {
        let dir = &config.modules_dir;
        if !dir.exists() {
            if !config.create_dir {
                return Err(RepositoryError::transport(format!(
                    "Directory does not exist: {}",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
            info!(dir = %dir.display(), "Created modules directory");
        } else if !dir.is_dir() {
            return Err(RepositoryError::transport(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        Ok(Self { config })
    }

    /// The watched modules directory
    pub fn modules_dir(&self) -> &Path {
        &self.config.modules_dir
    }

    fn module_path(&self, name: &ModuleName) -> PathBuf {
        self.config.modules_dir.join(format!("{}.yaml", name))
    }

    async fn yaml_files(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let dir = self.modules_dir();
        let mut entries = fs::read_dir(dir).await.map_err(|e| io_error(dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            let path = entry.path();
            if !is_yaml_file(&path) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| io_error(&path, e))?;
            if file_type.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every module in the directory with the file that defines it
    async fn scan(&self) -> Result<Vec<(PathBuf, Module)>, RepositoryError> {
        let mut found = Vec::new();
        let mut seen: HashMap<ModuleName, PathBuf> = HashMap::new();

        for path in self.yaml_files().await? {
            let contents = fs::read_to_string(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            let Some(module) = parse_module(&path, &contents)? else {
                debug!(file = %path.display(), "Skipping empty module file");
                continue;
            };

            if let Some(first) = seen.get(&module.name) {
                return Err(RepositoryError::conflict(format!(
                    "Duplicate module name '{}' in {} (already defined in {})",
                    module.name,
                    path.display(),
                    first.display()
                )));
            }
            seen.insert(module.name.clone(), path.clone());
            found.push((path, module));
        }

        Ok(found)
    }

    async fn locate(&self, name: &ModuleName) -> Result<(PathBuf, Module), RepositoryError> {
        self.scan()
            .await?
            .into_iter()
            .find(|(_, module)| &module.name == name)
            .ok_or_else(|| RepositoryError::not_found(name))
    }
}

#[async_trait]
impl ModuleRepository for YamlDirectoryRepository {
    #[instrument(skip(self), fields(dir = %self.config.modules_dir.display()))]
    async fn load(&self) -> Result<ModuleSet, RepositoryError> {
        let modules: ModuleSet = self.scan().await?.into_iter().map(|(_, m)| m).collect();
        info!(module_count = modules.len(), "Loaded modules from directory");
        Ok(modules)
    }

    #[instrument(skip(self, module), fields(module = %module.name))]
    async fn create(&self, module: &Module) -> Result<Module, RepositoryError> {
        module.validate()?;

        if self.scan().await?.iter().any(|(_, m)| m.name == module.name) {
            return Err(RepositoryError::conflict(format!(
                "Module {} already exists",
                module.name
            )));
        }
        let path = self.module_path(&module.name);
        if fs::try_exists(&path).await.map_err(|e| io_error(&path, e))? {
            return Err(RepositoryError::conflict(format!(
                "File already exists: {}",
                path.display()
            )));
        }

        write_module(&path, module).await?;
        info!(file = %path.display(), "Created module file");
        Ok(module.clone())
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, name: &ModuleName, patch: &ModulePatch) -> Result<Module, RepositoryError> {
        let (path, current) = self.locate(name).await?;
        let updated = patch.apply(&current);
        updated.validate()?;

        write_module(&path, &updated).await?;
        debug!(file = %path.display(), "Updated module file");
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &ModuleName) -> Result<(), RepositoryError> {
        let (path, _) = self.locate(name).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        info!(file = %path.display(), "Deleted module file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgraph_core::{ModuleStatus, RepositoryErrorKind};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const AUTH: &str = "\
name: UserAuth
description: Handles login
status: implemented
dependencies:
  - Database
";

    const DATABASE: &str = "\
name: Database
description: Stores records
status: placeholder
version: 1.0.0
";

    fn repository(dir: &TempDir) -> YamlDirectoryRepository {
        YamlDirectoryRepository::new(YamlRepositoryConfig::new(dir.path())).unwrap()
    }

    fn write(dir: &TempDir, file: &str, contents: &str) {
        std::fs::write(dir.path().join(file), contents).unwrap();
    }

    fn names(set: &ModuleSet) -> Vec<&str> {
        set.names().map(|n| n.as_str()).collect()
    }

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("/modules/auth.yaml")));
        assert!(is_yaml_file(Path::new("/modules/auth.yml")));
        assert!(is_yaml_file(Path::new("/modules/AUTH.YAML")));
        assert!(!is_yaml_file(Path::new("/modules/auth.yaml.tmp")));
        assert!(!is_yaml_file(Path::new("/modules/readme.md")));
        assert!(!is_yaml_file(Path::new("/modules/yaml")));
    }

    #[test]
    fn test_parse_module_skips_empty_documents() {
        let path = Path::new("empty.yaml");
        assert_eq!(parse_module(path, "").unwrap(), None);
        assert_eq!(parse_module(path, "# nothing here\n").unwrap(), None);
    }

    #[test]
    fn test_parse_module_reports_file_on_schema_error() {
        let path = Path::new("bad.yaml");
        let err = parse_module(path, "name: 1Bad\ndescription: x\nstatus: placeholder\n")
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert!(err.message.contains("bad.yaml"));

        let err = parse_module(path, "name: Good\ndescription: x\nstatus: finished\n")
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_load_reads_yaml_files_in_name_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b_database.yml", DATABASE);
        write(&dir, "a_auth.yaml", AUTH);
        write(&dir, "c_empty.yaml", "");
        write(&dir, "notes.txt", "name: Ignored");

        let modules = repository(&dir).load().await.unwrap();
        assert_eq!(names(&modules), vec!["UserAuth", "Database"]);
        assert_eq!(
            modules.get("Database").unwrap().version.as_deref(),
            Some("1.0.0")
        );
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.yaml", "name: [unclosed");

        let err = repository(&dir).load().await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert!(err.message.contains("broken.yaml"));
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_names() {
        let dir = TempDir::new().unwrap();
        write(&dir, "auth.yaml", AUTH);
        write(&dir, "auth_copy.yaml", AUTH);

        let err = repository(&dir).load().await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Conflict);
        assert!(err.message.contains("UserAuth"));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("modules");

        let err = YamlDirectoryRepository::new(YamlRepositoryConfig::new(&missing)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Transport);

        let repository =
            YamlDirectoryRepository::new(YamlRepositoryConfig::new(&missing).with_create_dir(true))
                .unwrap();
        assert!(missing.is_dir());
        assert!(repository.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_writes_a_file_per_module() {
        let dir = TempDir::new().unwrap();
        let repository = repository(&dir);
        let module = Module::new("Cache", "Keeps hot data", ModuleStatus::Placeholder)
            .with_dependencies(["Database"]);

        let created = repository.create(&module).await.unwrap();
        assert_eq!(created, module);
        assert!(dir.path().join("Cache.yaml").is_file());
        assert!(!dir.path().join("Cache.yaml.tmp").exists());

        let loaded = repository.load().await.unwrap();
        assert_eq!(loaded.get("Cache"), Some(&module));

        let err = repository.create(&module).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_conflicts_with_module_in_other_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "auth.yaml", AUTH);

        let err = repository(&dir)
            .create(&Module::new("UserAuth", "Again", ModuleStatus::Placeholder))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_validates() {
        let dir = TempDir::new().unwrap();
        let err = repository(&dir)
            .create(&Module::new("Bad Name", "Spaces", ModuleStatus::Placeholder))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_update_rewrites_the_defining_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "auth.yml", AUTH);
        let repository = repository(&dir);

        let updated = repository
            .update(&"UserAuth".into(), &ModulePatch::status(ModuleStatus::Error))
            .await
            .unwrap();
        assert_eq!(updated.status, ModuleStatus::Error);
        assert_eq!(updated.description, "Handles login");
        assert!(!dir.path().join("UserAuth.yaml").exists());

        let contents = std::fs::read_to_string(dir.path().join("auth.yml")).unwrap();
        let reparsed = parse_module(Path::new("auth.yml"), &contents).unwrap().unwrap();
        assert_eq!(reparsed, updated);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_result() {
        let dir = TempDir::new().unwrap();
        write(&dir, "auth.yaml", AUTH);
        let repository = repository(&dir);

        let err = repository
            .update(&"UserAuth".into(), &ModulePatch::description("   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("auth.yaml")).unwrap(),
            AUTH
        );

        let err = repository
            .update(&"Missing".into(), &ModulePatch::status(ModuleStatus::Error))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_the_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "auth.yaml", AUTH);
        write(&dir, "database.yaml", DATABASE);
        let repository = repository(&dir);

        repository.delete(&"UserAuth".into()).await.unwrap();
        assert!(!dir.path().join("auth.yaml").exists());
        assert_eq!(names(&repository.load().await.unwrap()), vec!["Database"]);

        let err = repository.delete(&"UserAuth".into()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    }
}
