//! Subcommand implementations. Output goes to the given writer, logs to stderr.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{info, warn};

use modgraph_core::{
    DependencyGraph, ModuleGraphStore, ModuleRepository, ModuleSet, ModuleStatistics,
    ModuleStatus, StoreConfig, StoreEvent, StructuredFilter, SurrogateRegistry, SurrogateRequest,
    SurrogateRun,
};
use modgraph_state_yaml::{
    ModuleDirectoryWatcher, WatcherConfig, YamlDirectoryRepository, YamlRepositoryConfig,
};

fn open(dir: &Path) -> Result<YamlDirectoryRepository> {
    YamlDirectoryRepository::new(YamlRepositoryConfig::new(dir))
        .with_context(|| format!("Failed to open {}", dir.display()))
}

async fn open_store(dir: &Path) -> Result<ModuleGraphStore> {
    let store = ModuleGraphStore::new(Arc::new(open(dir)?), StoreConfig::from_env());
    store
        .load()
        .await
        .with_context(|| format!("Failed to load modules from {}", dir.display()))?;
    Ok(store)
}

async fn load(dir: &Path) -> Result<ModuleSet> {
    open(dir)?
        .load()
        .await
        .with_context(|| format!("Failed to load modules from {}", dir.display()))
}

/// Load a directory and report its modules. Returns the module count.
pub async fn validate(
    dir: &Path,
    validate_deps: bool,
    quiet: bool,
    out: &mut impl Write,
) -> Result<usize> {
    let modules = load(dir).await?;
    if modules.is_empty() {
        writeln!(out, "Warning: No modules found in {}", dir.display())?;
    }

    if !quiet {
        writeln!(
            out,
            "Successfully loaded {} modules from {}",
            modules.len(),
            dir.display()
        )?;
        writeln!(out, "\nModules:")?;
        for module in modules.iter() {
            writeln!(out, "  - {} ({}): {}", module.name, module.status, module.description)?;
        }
    }

    if validate_deps {
        for warning in DependencyGraph::build(&modules).integrity_warnings() {
            writeln!(out, "Warning: {}", warning)?;
        }
    }

    if !quiet {
        writeln!(
            out,
            "\nValidation complete. All {} modules are valid.",
            modules.len()
        )?;
    }
    Ok(modules.len())
}

/// Print statistics, resolution order and layout levels
pub async fn stats(dir: &Path, out: &mut impl Write) -> Result<()> {
    let modules = load(dir).await?;
    let stats = ModuleStatistics::compute(&modules);
    let graph = DependencyGraph::build(&modules);

    writeln!(out, "Modules: {}", stats.total_modules)?;
    for status in ModuleStatus::ALL {
        writeln!(out, "  {}: {}", status, stats.count(status))?;
    }
    writeln!(out, "Dependencies: {}", stats.dependency_count)?;

    match graph.resolve() {
        Ok(order) => {
            let order: Vec<&str> = order.iter().map(|n| n.as_str()).collect();
            writeln!(out, "Resolution order: {}", order.join(", "))?;
        }
        Err(cycle) => writeln!(out, "{}", cycle)?,
    }

    let levels = graph.levels();
    let mut by_level: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut unplaced = Vec::new();
    for name in modules.names() {
        match levels.get(name) {
            Some(level) => by_level.entry(*level).or_default().push(name.as_str()),
            None => unplaced.push(name.as_str()),
        }
    }

    writeln!(out, "Levels:")?;
    for (level, names) in &by_level {
        writeln!(out, "  {}: {}", level, names.join(", "))?;
    }
    if !unplaced.is_empty() {
        writeln!(out, "  cyclic: {}", unplaced.join(", "))?;
    }
    Ok(())
}

/// Filters applied by the `search` subcommand
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    /// Free-text query
    pub query: String,
    /// Status filters
    pub statuses: Vec<ModuleStatus>,
    /// Structured `field=value` filters
    pub filters: Vec<StructuredFilter>,
}

/// Run a search through the store and print the visible modules.
/// Returns the result count.
pub async fn search(dir: &Path, args: SearchArgs, out: &mut impl Write) -> Result<usize> {
    let store = open_store(dir).await?;
    store.set_search_query(args.query);
    for status in args.statuses {
        store.toggle_status_filter(status);
    }
    for filter in args.filters {
        store.add_filter(filter);
    }

    for module in store.visible_modules() {
        writeln!(out, "  - {} ({}): {}", module.name, module.status, module.description)?;
    }
    let count = store.result_count();
    writeln!(out, "{} of {} modules match", count, store.canonical().len())?;
    Ok(count)
}

/// Print the registered surrogates
pub fn surrogates(registry: &SurrogateRegistry, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Available surrogates:")?;
    for (name, info) in registry.list() {
        writeln!(out, "  {}: {} - {}", name, info.kind, info.description)?;
    }
    Ok(())
}

/// Arguments of the `run` subcommand
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Module to stand in for
    pub module: String,
    /// Surrogate name; the module's implementation or `static_stub` when absent
    pub surrogate: Option<String>,
    /// Inputs as a JSON object
    pub inputs: Option<String>,
    /// Surrogate options as a JSON object
    pub options: Option<String>,
}

fn parse_json(flag: &str, raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw).with_context(|| format!("Invalid JSON for --{}", flag)),
    }
}

/// Run a surrogate for one module of the directory and print the result as JSON
pub async fn run(dir: &Path, args: RunArgs, out: &mut impl Write) -> Result<SurrogateRun> {
    let request = SurrogateRequest {
        surrogate_type: args.surrogate,
        inputs: parse_json("inputs", args.inputs.as_deref())?,
        options: parse_json("options", args.options.as_deref())?,
    };
    let store = open_store(dir).await?;
    let run = store
        .run_surrogate(&SurrogateRegistry::default(), &args.module, request)
        .with_context(|| format!("Failed to run surrogate for {}", args.module))?;

    writeln!(out, "{}", serde_json::to_string_pretty(&run)?)?;
    Ok(run)
}

/// Run a store over the directory and log every reload until Ctrl-C
pub async fn watch(dir: &Path, config: WatcherConfig) -> Result<()> {
    let repository = Arc::new(open(dir)?);
    let store = Arc::new(ModuleGraphStore::new(
        repository.clone(),
        StoreConfig::from_env(),
    ));
    store
        .load()
        .await
        .with_context(|| format!("Failed to load modules from {}", dir.display()))?;
    info!(module_count = store.canonical().len(), dir = %dir.display(), "Loaded modules");

    let (reload_tx, reload_rx) = mpsc::channel(16);
    let watcher = ModuleDirectoryWatcher::spawn(repository, &config, reload_tx)
        .context("Failed to start directory watcher")?;
    let listener = store.clone().spawn_reload_listener(reload_rx);
    let mut events = store.subscribe();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(error = %err, "Failed to listen for Ctrl-C");
                }
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(StoreEvent::CanonicalReplaced { module_count }) => {
                    let warnings = store.integrity_warnings();
                    info!(module_count, warning_count = warnings.len(), "Module set reloaded");
                    for warning in warnings {
                        warn!("{}", warning);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Store events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    watcher.stop().await;
    listener.abort();
    store.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, contents: &str) {
        std::fs::write(dir.path().join(file), contents).unwrap();
    }

    fn seeded() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "a_auth.yaml",
            "name: UserAuth\ndescription: Handles login\nstatus: implemented\ndependencies: [Database, Mailer]\n",
        );
        write(
            &dir,
            "b_database.yaml",
            "name: Database\ndescription: Stores records\nstatus: placeholder\nversion: 1.0.0\n",
        );
        dir
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_validate_reports_missing_dependencies() {
        let dir = seeded();
        let mut out = Vec::new();
        let count = validate(dir.path(), true, false, &mut out).await.unwrap();
        let out = text(out);

        assert_eq!(count, 2);
        assert!(out.contains("Successfully loaded 2 modules"));
        assert!(out.contains("  - UserAuth (implemented): Handles login"));
        assert!(out.contains("Warning: Module 'UserAuth' depends on 'Mailer' which was not found"));
        assert!(out.contains("All 2 modules are valid."));
    }

    #[tokio::test]
    async fn test_validate_quiet_and_failure() {
        let dir = seeded();
        let mut out = Vec::new();
        validate(dir.path(), false, true, &mut out).await.unwrap();
        assert!(out.is_empty());

        write(&dir, "c_bad.yaml", "name: Bad Name\ndescription: x\nstatus: placeholder\n");
        let err = validate(dir.path(), false, true, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("c_bad.yaml"));
    }

    #[tokio::test]
    async fn test_stats_prints_order_and_levels() {
        let dir = seeded();
        let mut out = Vec::new();
        stats(dir.path(), &mut out).await.unwrap();
        let out = text(out);

        assert!(out.contains("Modules: 2"));
        assert!(out.contains("  implemented: 1"));
        assert!(out.contains("Dependencies: 2"));
        assert!(out.contains("Resolution order: Database, UserAuth"));
        assert!(out.contains("  0: Database\n  1: UserAuth"));
    }

    #[tokio::test]
    async fn test_stats_reports_cycle() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "name: A\ndescription: a\nstatus: placeholder\ndependencies: [B]\n");
        write(&dir, "b.yaml", "name: B\ndescription: b\nstatus: placeholder\ndependencies: [A]\n");
        write(&dir, "c.yaml", "name: C\ndescription: c\nstatus: placeholder\n");

        let mut out = Vec::new();
        stats(dir.path(), &mut out).await.unwrap();
        let out = text(out);

        assert!(out.contains("Circular dependency detected"));
        assert!(out.contains("  0: C"));
        assert!(out.contains("  cyclic: A, B"));
    }

    #[test]
    fn test_surrogates_lists_builtins() {
        let mut out = Vec::new();
        surrogates(&SurrogateRegistry::default(), &mut out).unwrap();
        let out = text(out);
        assert!(out.starts_with("Available surrogates:\n"));
        assert!(out.contains("  mock_llm: MockLLMSurrogate - "));
        assert!(out.contains("  static_stub: StaticStubSurrogate - "));
    }

    #[tokio::test]
    async fn test_run_prints_surrogate_result() {
        let dir = seeded();
        let args = RunArgs {
            module: "Database".into(),
            inputs: Some(r#"{"query": "select"}"#.into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        let run = run(dir.path(), args, &mut out).await.unwrap();
        assert_eq!(run.surrogate_type, "static_stub");
        assert_eq!(run.outputs["inputs_received"], serde_json::json!(["query"]));

        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["module_name"], "Database");
        assert_eq!(printed["execution_info"]["module_status"], "placeholder");
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_module_and_bad_json() {
        let dir = seeded();
        let args = RunArgs {
            module: "Ghost".into(),
            ..Default::default()
        };
        let err = run(dir.path(), args, &mut Vec::new()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Module not found: Ghost"));

        let args = RunArgs {
            module: "Database".into(),
            inputs: Some("{not json".into()),
            ..Default::default()
        };
        let err = run(dir.path(), args, &mut Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("--inputs"));
    }

    #[tokio::test]
    async fn test_search_combines_query_status_and_filters() {
        let dir = seeded();

        let mut out = Vec::new();
        let args = SearchArgs {
            query: "records".into(),
            ..Default::default()
        };
        assert_eq!(search(dir.path(), args, &mut out).await.unwrap(), 1);
        assert!(text(out).ends_with("1 of 2 modules match\n"));

        let args = SearchArgs {
            statuses: vec![ModuleStatus::Implemented],
            filters: vec!["dependency=Database".parse().unwrap()],
            ..Default::default()
        };
        let mut out = Vec::new();
        assert_eq!(search(dir.path(), args, &mut out).await.unwrap(), 1);
        assert!(text(out).contains("UserAuth"));

        let args = SearchArgs {
            filters: vec!["version=2.0".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(search(dir.path(), args, &mut Vec::new()).await.unwrap(), 0);
    }
}
