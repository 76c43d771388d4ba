//! Directory watcher that turns module file changes into reload events.
//!
//! File events are debounced, filtered to YAML files and coalesced. Each
//! burst triggers a full reload through the repository; a successful load is
//! forwarded as a [`ReloadEvent`], an invalid directory state is logged and
//! skipped so the store keeps its last good set.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use modgraph_core::{ModuleRepository, ReloadEvent};

use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::repository::{is_yaml_file, YamlDirectoryRepository};

/// Watches a modules directory and publishes reloaded sets
pub struct ModuleDirectoryWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    reload_task: JoinHandle<()>,
}

impl ModuleDirectoryWatcher {
    /// Start watching the repository's directory.
    ///
    /// Must be called from within a tokio runtime. Reloaded sets are sent on
    /// `reload_tx` until the receiver is dropped or the watcher is stopped.
    pub fn spawn(
        repository: Arc<YamlDirectoryRepository>,
        config: &WatcherConfig,
        reload_tx: mpsc::Sender<ReloadEvent>,
    ) -> Result<Self, WatchError> {
        let dir = repository.modules_dir().to_path_buf();
        let (event_tx, event_rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(config.debounce(), event_tx).map_err(WatchError::Create)?;
        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: dir.clone(),
                source,
            })?;

        info!(dir = %dir.display(), debounce_ms = config.debounce_ms, "Started watching modules directory");

        // Capacity one: a pending reload already covers any later change
        let (change_tx, change_rx) = mpsc::channel(1);
        std::thread::spawn(move || forward_changes(event_rx, change_tx));

        let source = dir.display().to_string();
        let reload_task = tokio::spawn(reload_on_change(repository, change_rx, reload_tx, source));

        Ok(Self {
            debouncer,
            reload_task,
        })
    }

    /// Stop watching and wait for the reload task to finish
    pub async fn stop(self) {
        drop(self.debouncer);
        self.reload_task.abort();
        match self.reload_task.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "Reload task failed"),
        }
        debug!("Module directory watcher stopped");
    }
}

fn forward_changes(
    event_rx: std::sync::mpsc::Receiver<DebounceEventResult>,
    change_tx: mpsc::Sender<()>,
) {
    while let Ok(result) = event_rx.recv() {
        match result {
            Ok(events) => {
                if !events.iter().any(|event| is_yaml_file(&event.path)) {
                    continue;
                }
                debug!(event_count = events.len(), "Detected module file changes");
                match change_tx.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                }
            }
            Err(err) => warn!(error = %err, "File watcher error"),
        }
    }
    debug!("File event channel closed");
}

async fn reload_on_change(
    repository: Arc<YamlDirectoryRepository>,
    mut change_rx: mpsc::Receiver<()>,
    reload_tx: mpsc::Sender<ReloadEvent>,
    source: String,
) {
    while change_rx.recv().await.is_some() {
        match repository.load().await {
            Ok(modules) => {
                debug!(module_count = modules.len(), "Reloaded modules directory");
                if reload_tx
                    .send(ReloadEvent::new(modules, source.clone()))
                    .await
                    .is_err()
                {
                    debug!("Reload receiver dropped");
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "Skipping reload of invalid modules directory");
            }
        }
    }
}
