//! Module graph store
//!
//! Owns the canonical module set and orchestrates the repository, the search
//! index, the selection manager and the command history.
//!
//! State lives behind a lock that is never held across a repository round
//! trip. While a mutation is in flight its modules are marked busy; unrelated
//! operations keep going. Reloads that arrive while anything is in flight are
//! held back and applied once the last in-flight operation resolves.

use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::history::{
    Command, CommandHistory, CommandKind, ModuleChange, RepositoryOp,
};
use crate::application::search::{compute_visible, SearchState, StructuredFilter};
use crate::application::selection::SelectionManager;
use crate::application::surrogate::{SurrogateRegistry, SurrogateRequest, SurrogateRun};
use crate::config::StoreConfig;
use crate::domain::events::{ChangeKind, ReloadEvent, StoreEvent};
use crate::domain::graph::{DependencyGraph, IntegrityWarning, ModuleStatistics};
use crate::domain::module::{Module, ModuleName, ModulePatch, ModuleSet, ModuleStatus};
use crate::domain::repository::ModuleRepository;
use crate::error::{BulkFailure, RepositoryError, RepositoryErrorKind, StoreError};

/// Lifecycle status of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    /// Nothing loaded yet, or torn down
    Idle,
    /// A load is in progress
    Loading,
    /// Canonical set is available
    Ready,
    /// The last load failed
    Error(String),
}

/// Connection to the persistence layer, as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Last load succeeded
    Connected,
    /// Never loaded, or the last load failed
    Disconnected,
    /// A load is in progress
    Loading,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Loading => write!(f, "loading"),
        }
    }
}

/// What happened to a delivered module set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Canonical set replaced and history discarded
    Applied,
    /// Set holds the same modules as the canonical set; nothing changed
    Unchanged,
    /// Held until in-flight operations resolve
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Undo => write!(f, "undo"),
            Direction::Redo => write!(f, "redo"),
        }
    }
}

enum RenameStep {
    CreateFailed(RepositoryError),
    Done(Option<Module>),
    DeleteFailed {
        created: Option<Module>,
        error: RepositoryError,
        rolled_back: bool,
    },
}

#[derive(Debug)]
struct StoreState {
    status: StoreStatus,
    connection: ConnectionStatus,
    loaded: bool,
    canonical: ModuleSet,
    selection: SelectionManager,
    search: SearchState,
    history: CommandHistory,
    last_error: Option<StoreError>,
    in_flight: HashSet<ModuleName>,
    history_step: bool,
    pending_reload: Option<ReloadEvent>,
    generation: u64,
}

impl StoreState {
    fn new(history_limit: usize) -> Self {
        Self {
            status: StoreStatus::Idle,
            connection: ConnectionStatus::Disconnected,
            loaded: false,
            canonical: ModuleSet::new(),
            selection: SelectionManager::new(),
            search: SearchState::new(),
            history: CommandHistory::new(history_limit),
            last_error: None,
            in_flight: HashSet::new(),
            history_step: false,
            pending_reload: None,
            generation: 0,
        }
    }

    fn ensure_mutable(&self) -> Result<(), StoreError> {
        if !self.loaded {
            return Err(StoreError::NotReady);
        }
        if self.history_step {
            return Err(StoreError::HistoryBusy);
        }
        Ok(())
    }

    fn record_error(&mut self, err: StoreError, events: &mut Vec<StoreEvent>) -> StoreError {
        warn!(error = %err, kind = ?err.kind(), "Store operation failed");
        events.push(StoreEvent::ErrorRaised { kind: err.kind() });
        self.last_error = Some(err.clone());
        err
    }

    fn install(&mut self, event: ReloadEvent, events: &mut Vec<StoreEvent>) -> ReloadOutcome {
        if !self.in_flight.is_empty() || self.history_step {
            info!(
                source = %event.source,
                in_flight = self.in_flight.len(),
                "Deferring reload until in-flight operations resolve"
            );
            self.pending_reload = Some(event);
            return ReloadOutcome::Deferred;
        }
        self.replace_canonical(event, events)
    }

    fn replace_canonical(&mut self, event: ReloadEvent, events: &mut Vec<StoreEvent>) -> ReloadOutcome {
        if self.status != StoreStatus::Ready {
            self.status = StoreStatus::Ready;
            events.push(StoreEvent::StatusChanged);
        }
        self.connection = ConnectionStatus::Connected;

        if self.loaded && self.canonical.same_modules(&event.modules) {
            debug!(source = %event.source, "Reloaded set matches canonical set");
            return ReloadOutcome::Unchanged;
        }
        self.loaded = true;

        for warning in DependencyGraph::build(&event.modules).integrity_warnings() {
            warn!(warning = %warning, "Module integrity warning");
        }

        let module_count = event.modules.len();
        self.canonical = event.modules;
        if !self.history.is_empty() {
            self.history.clear();
            events.push(StoreEvent::HistoryChanged);
        }
        info!(source = %event.source, module_count, "Canonical module set replaced");
        events.push(StoreEvent::CanonicalReplaced { module_count });
        ReloadOutcome::Applied
    }

    fn drain_pending_reload(&mut self, events: &mut Vec<StoreEvent>) {
        if !self.in_flight.is_empty() || self.history_step {
            return;
        }
        if let Some(event) = self.pending_reload.take() {
            self.replace_canonical(event, events);
        }
    }

    fn push_command(&mut self, command: Command, events: &mut Vec<StoreEvent>) {
        info!(command = %command, changes = command.changes.len(), "Command recorded");
        self.history.push(command);
        events.push(StoreEvent::HistoryChanged);
    }

    /// Apply a successful repository call to the canonical set
    fn commit(
        &mut self,
        op: &RepositoryOp,
        result: Option<Module>,
        events: &mut Vec<StoreEvent>,
    ) -> Option<ModuleChange> {
        match op {
            RepositoryOp::Create { module, position } => {
                let module = result.unwrap_or_else(|| module.clone());
                let name = module.name.clone();
                self.canonical.insert_at(*position, module.clone());
                let position = self.canonical.position(name.as_str()).unwrap_or(*position);
                events.push(StoreEvent::ModuleCommitted {
                    name,
                    change: ChangeKind::Created,
                });
                Some(ModuleChange::created(module, position))
            }
            RepositoryOp::Update { name, patch } => {
                let before = self.canonical.get(name.as_str()).cloned();
                let after = match (result, &before) {
                    (Some(module), _) => module,
                    (None, Some(before)) => patch.apply(before),
                    (None, None) => return None,
                };
                self.canonical.insert(after.clone());
                let position = self.canonical.position(name.as_str()).unwrap_or_default();
                events.push(StoreEvent::ModuleCommitted {
                    name: name.clone(),
                    change: ChangeKind::Updated,
                });
                Some(match before {
                    Some(before) => ModuleChange::updated(before, after, position),
                    None => ModuleChange::created(after, position),
                })
            }
            RepositoryOp::Delete { name } => {
                let (position, module) = self.canonical.remove(name.as_str())?;
                if self.selection.deselect(name.as_str()) {
                    events.push(StoreEvent::SelectionChanged);
                }
                events.push(StoreEvent::ModuleCommitted {
                    name: name.clone(),
                    change: ChangeKind::Deleted,
                });
                Some(ModuleChange::deleted(module, position))
            }
        }
    }

    /// Forget a module the repository reported as missing.
    ///
    /// The name leaves the selection and the canonical set. History is kept.
    fn prune_stale(
        &mut self,
        name: &ModuleName,
        error: &RepositoryError,
        events: &mut Vec<StoreEvent>,
    ) {
        if error.kind != RepositoryErrorKind::NotFound {
            return;
        }
        if self.selection.deselect(name.as_str()) {
            events.push(StoreEvent::SelectionChanged);
        }
        if self.canonical.remove(name.as_str()).is_some() {
            info!(module = %name, "Dropped module missing from the repository");
            events.push(StoreEvent::ModuleCommitted {
                name: name.clone(),
                change: ChangeKind::Deleted,
            });
        }
    }
}

/// Reactive state engine over a module repository
pub struct ModuleGraphStore {
    repository: Arc<dyn ModuleRepository>,
    config: StoreConfig,
    state: RwLock<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl ModuleGraphStore {
    /// Create an idle store over `repository`
    pub fn new(repository: Arc<dyn ModuleRepository>, config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            repository,
            state: RwLock::new(StoreState::new(config.history_limit)),
            config,
            events,
        }
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe to state change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<StoreEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    /// Run `f` under the write lock, then publish the events it produced
    fn update<R>(&self, f: impl FnOnce(&mut StoreState, &mut Vec<StoreEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.write_state();
            f(&mut *guard, &mut events)
        };
        self.publish(events);
        result
    }

    fn fail<T>(&self, err: StoreError) -> Result<T, StoreError> {
        Err(self.update(|s, events| s.record_error(err, events)))
    }

    // ---- Lifecycle ----

    /// Load the canonical set from the repository.
    ///
    /// Also used to reload; a successful reload that differs from the
    /// canonical set discards history.
    pub async fn load(&self) -> Result<ReloadOutcome, StoreError> {
        let generation = self.update(|s, events| {
            s.status = StoreStatus::Loading;
            s.connection = ConnectionStatus::Loading;
            events.push(StoreEvent::StatusChanged);
            s.generation
        });
        info!("Loading module set");

        let result = self.repository.load().await;

        self.update(|s, events| {
            if s.generation != generation {
                debug!("Discarding load result after teardown");
                return Err(StoreError::NotReady);
            }
            match result {
                Ok(modules) => Ok(s.install(ReloadEvent::new(modules, "repository"), events)),
                Err(err) => {
                    s.status = StoreStatus::Error(err.to_string());
                    s.connection = ConnectionStatus::Disconnected;
                    events.push(StoreEvent::StatusChanged);
                    Err(s.record_error(err.into(), events))
                }
            }
        })
    }

    /// Apply an externally delivered module set
    pub fn apply_reload(&self, event: ReloadEvent) -> ReloadOutcome {
        self.update(|s, events| s.install(event, events))
    }

    /// Apply every set delivered on `reloads` until the sender is dropped
    pub fn spawn_reload_listener(
        self: Arc<Self>,
        mut reloads: mpsc::Receiver<ReloadEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = reloads.recv().await {
                let source = event.source.clone();
                let outcome = self.apply_reload(event);
                debug!(source = %source, outcome = ?outcome, "Reload event handled");
            }
            info!("Reload channel closed, listener stopping");
        })
    }

    /// Drop canonical state, selection, search and history; back to `Idle`.
    ///
    /// Results of operations still in flight are discarded when they resolve.
    pub fn teardown(&self) {
        let limit = self.config.history_limit;
        self.update(|s, events| {
            let generation = s.generation + 1;
            *s = StoreState::new(limit);
            s.generation = generation;
            events.push(StoreEvent::StatusChanged);
        });
        info!("Store torn down");
    }

    // ---- Mutations ----

    fn begin<T, F>(&self, names: &[ModuleName], check: F) -> Result<(T, u64), StoreError>
    where
        F: FnOnce(&StoreState) -> Result<T, StoreError>,
    {
        self.update(|s, events| {
            let checked = s
                .ensure_mutable()
                .and_then(|()| match names.iter().find(|n| s.in_flight.contains(*n)) {
                    Some(busy) => Err(StoreError::Busy(busy.clone())),
                    None => Ok(()),
                })
                .and_then(|()| check(&*s));
            match checked {
                Ok(value) => {
                    s.in_flight.extend(names.iter().cloned());
                    Ok((value, s.generation))
                }
                Err(err) => Err(s.record_error(err, events)),
            }
        })
    }

    async fn execute(&self, op: &RepositoryOp) -> Result<Option<Module>, RepositoryError> {
        match op {
            RepositoryOp::Create { module, .. } => self.repository.create(module).await.map(Some),
            RepositoryOp::Update { name, patch } => {
                self.repository.update(name, patch).await.map(Some)
            }
            RepositoryOp::Delete { name } => self.repository.delete(name).await.map(|()| None),
        }
    }

    async fn run_single(
        &self,
        kind: CommandKind,
        op: RepositoryOp,
        generation: u64,
    ) -> Result<Option<Module>, StoreError> {
        let result = self.execute(&op).await;
        let name = op.name().clone();

        self.update(|s, events| {
            if s.generation != generation {
                debug!(module = %name, "Discarding mutation result after teardown");
                return Err(StoreError::NotReady);
            }
            s.in_flight.remove(&name);
            let outcome = match result {
                Ok(module) => {
                    if let Some(change) = s.commit(&op, module.clone(), events) {
                        s.push_command(Command::new(kind, vec![change]), events);
                    }
                    s.last_error = None;
                    Ok(module)
                }
                Err(err) => {
                    s.prune_stale(&name, &err, events);
                    Err(s.record_error(err.into(), events))
                }
            };
            s.drain_pending_reload(events);
            outcome
        })
    }

    /// Create a module
    pub async fn create_module(&self, module: Module) -> Result<Module, StoreError> {
        let name = module.name.clone();
        let (_, generation) = self.begin(std::slice::from_ref(&name), |s| {
            module.validate().map_err(RepositoryError::from)?;
            if s.canonical.contains(name.as_str()) {
                return Err(StoreError::AlreadyExists(name.clone()));
            }
            Ok(())
        })?;

        let fallback = module.clone();
        let op = RepositoryOp::Create {
            module,
            position: usize::MAX,
        };
        let created = self.run_single(CommandKind::Create, op, generation).await?;
        Ok(created.unwrap_or(fallback))
    }

    /// Update a module with a partial patch
    pub async fn update_module(&self, name: &str, patch: ModulePatch) -> Result<Module, StoreError> {
        let name = ModuleName::from(name);
        if patch.is_empty() {
            debug!(module = %name, "Empty patch, nothing to update");
            return match self.module(name.as_str()) {
                Some(module) => Ok(module),
                None => self.fail(StoreError::NotFound(name)),
            };
        }

        let (current, generation) = self.begin(std::slice::from_ref(&name), |s| {
            let current = s
                .canonical
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| StoreError::NotFound(name.clone()))?;
            patch.apply(&current).validate().map_err(RepositoryError::from)?;
            Ok(current)
        })?;

        let expected = patch.apply(&current);
        let op = RepositoryOp::Update { name, patch };
        let updated = self.run_single(CommandKind::Update, op, generation).await?;
        Ok(updated.unwrap_or(expected))
    }

    /// Delete a module
    pub async fn delete_module(&self, name: &str) -> Result<(), StoreError> {
        let name = ModuleName::from(name);
        let (_, generation) = self.begin(std::slice::from_ref(&name), |s| {
            if s.canonical.contains(name.as_str()) {
                Ok(())
            } else {
                Err(StoreError::NotFound(name.clone()))
            }
        })?;

        let op = RepositoryOp::Delete { name };
        self.run_single(CommandKind::Delete, op, generation).await?;
        Ok(())
    }

    /// Rename a module. Recorded as one command (create the new name, delete the old).
    ///
    /// If the delete fails the created module is removed again.
    pub async fn rename_module(
        &self,
        from: &str,
        to: impl Into<ModuleName>,
    ) -> Result<Module, StoreError> {
        let from = ModuleName::from(from);
        let to = to.into();
        if from == to {
            return self.fail(
                RepositoryError::validation(format!("Module {} is already named {}", from, to))
                    .into(),
            );
        }

        let names = [from.clone(), to.clone()];
        let ((renamed, position), generation) = self.begin(&names, |s| {
            let current = s
                .canonical
                .get(from.as_str())
                .ok_or_else(|| StoreError::NotFound(from.clone()))?;
            if s.canonical.contains(to.as_str()) {
                return Err(StoreError::AlreadyExists(to.clone()));
            }
            let mut renamed = current.clone();
            renamed.name = to.clone();
            renamed.validate().map_err(RepositoryError::from)?;
            let position = s.canonical.position(from.as_str()).unwrap_or_default();
            Ok((renamed, position))
        })?;

        let create = RepositoryOp::Create {
            module: renamed.clone(),
            position,
        };
        let delete = RepositoryOp::Delete { name: from.clone() };

        let step = match self.execute(&create).await {
            Err(err) => RenameStep::CreateFailed(err),
            Ok(created) => match self.execute(&delete).await {
                Ok(_) => RenameStep::Done(created),
                Err(error) => {
                    let rolled_back = self.repository.delete(&to).await.is_ok();
                    RenameStep::DeleteFailed {
                        created,
                        error,
                        rolled_back,
                    }
                }
            },
        };

        self.update(|s, events| {
            if s.generation != generation {
                debug!(from = %from, to = %to, "Discarding rename result after teardown");
                return Err(StoreError::NotReady);
            }
            for name in &names {
                s.in_flight.remove(name);
            }
            let outcome = match step {
                RenameStep::CreateFailed(err) => Err(s.record_error(err.into(), events)),
                RenameStep::Done(created) => {
                    let module = created.clone().unwrap_or_else(|| renamed.clone());
                    let changes: Vec<_> = s
                        .commit(&create, created, events)
                        .into_iter()
                        .chain(s.commit(&delete, None, events))
                        .collect();
                    let kind = CommandKind::Rename {
                        from: from.clone(),
                        to: to.clone(),
                    };
                    s.push_command(Command::new(kind, changes), events);
                    s.last_error = None;
                    Ok(module)
                }
                RenameStep::DeleteFailed {
                    created,
                    error,
                    rolled_back,
                } => {
                    if !rolled_back {
                        warn!(module = %to, "Rename rollback failed, keeping the created module");
                        if let Some(change) = s.commit(&create, created, events) {
                            s.push_command(Command::new(CommandKind::Create, vec![change]), events);
                        }
                    }
                    s.prune_stale(&from, &error, events);
                    Err(s.record_error(error.into(), events))
                }
            };
            s.drain_pending_reload(events);
            outcome
        })
    }

    /// Set the status of every selected module concurrently.
    ///
    /// Returns the number of modules updated. Partial success is kept and
    /// reported as `PartialBulkFailure`.
    pub async fn bulk_update_status(&self, status: ModuleStatus) -> Result<usize, StoreError> {
        self.run_bulk(CommandKind::BulkUpdateStatus(status), |name| {
            RepositoryOp::Update {
                name: name.clone(),
                patch: ModulePatch::status(status),
            }
        })
        .await
    }

    /// Delete every selected module concurrently.
    ///
    /// Returns the number of modules deleted. Partial success is kept and
    /// reported as `PartialBulkFailure`.
    pub async fn bulk_delete_modules(&self) -> Result<usize, StoreError> {
        self.run_bulk(CommandKind::BulkDelete, |name| RepositoryOp::Delete {
            name: name.clone(),
        })
        .await
    }

    async fn run_bulk<F>(&self, kind: CommandKind, make_op: F) -> Result<usize, StoreError>
    where
        F: Fn(&ModuleName) -> RepositoryOp,
    {
        let (existing, stale, generation) = self.update(|s, events| {
            let prepared = s.ensure_mutable().and_then(|()| {
                if !s.selection.is_multi_mode() || s.selection.count() == 0 {
                    return Err(StoreError::EmptySelection);
                }
                let mut selected: Vec<ModuleName> =
                    s.selection.selected_ids().into_iter().cloned().collect();
                let canonical = &s.canonical;
                selected.sort_by(|a, b| {
                    let pa = canonical.position(a.as_str()).unwrap_or(usize::MAX);
                    let pb = canonical.position(b.as_str()).unwrap_or(usize::MAX);
                    pa.cmp(&pb).then_with(|| a.cmp(b))
                });
                if let Some(busy) = selected.iter().find(|n| s.in_flight.contains(*n)) {
                    return Err(StoreError::Busy(busy.clone()));
                }
                Ok(selected)
            });
            match prepared {
                Ok(selected) => {
                    let (existing, stale): (Vec<_>, Vec<_>) = selected
                        .into_iter()
                        .partition(|name| s.canonical.contains(name.as_str()));
                    s.in_flight.extend(existing.iter().cloned());
                    Ok((existing, stale, s.generation))
                }
                Err(err) => Err(s.record_error(err, events)),
            }
        })?;

        let attempted = existing.len() + stale.len();
        info!(command = ?kind, attempted, stale = stale.len(), "Running bulk operation");

        let ops: Vec<RepositoryOp> = existing.iter().map(&make_op).collect();
        let results = join_all(ops.iter().map(|op| self.execute(op))).await;

        self.update(|s, events| {
            if s.generation != generation {
                debug!("Discarding bulk result after teardown");
                return Err(StoreError::NotReady);
            }
            for name in &existing {
                s.in_flight.remove(name);
            }

            let mut failures: Vec<BulkFailure> = stale
                .into_iter()
                .map(|name| BulkFailure {
                    error: RepositoryError::not_found(&name),
                    name,
                })
                .collect();
            let mut changes = Vec::new();
            for (op, result) in ops.iter().zip(results) {
                match result {
                    Ok(module) => changes.extend(s.commit(op, module, events)),
                    Err(error) => {
                        warn!(module = %op.name(), error = %error, "Bulk operation failed for module");
                        s.prune_stale(op.name(), &error, events);
                        failures.push(BulkFailure {
                            name: op.name().clone(),
                            error,
                        });
                    }
                }
            }

            let succeeded = changes.len();
            if !changes.is_empty() {
                s.push_command(Command::new(kind, changes), events);
            }
            s.selection.exit_multi_mode();
            events.push(StoreEvent::SelectionChanged);

            let outcome = if failures.is_empty() {
                s.last_error = None;
                Ok(succeeded)
            } else {
                Err(s.record_error(StoreError::from_failures(attempted, failures), events))
            };
            s.drain_pending_reload(events);
            outcome
        })
    }

    // ---- History ----

    /// Undo the last applied command through the repository.
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    pub async fn undo(&self) -> Result<bool, StoreError> {
        self.step_history(Direction::Undo).await
    }

    /// Redo the next undone command through the repository.
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    pub async fn redo(&self) -> Result<bool, StoreError> {
        self.step_history(Direction::Redo).await
    }

    async fn step_history(&self, direction: Direction) -> Result<bool, StoreError> {
        let prepared = self.update(|s, events| {
            let checked = if !s.loaded {
                Err(StoreError::NotReady)
            } else if s.history_step || !s.in_flight.is_empty() {
                Err(StoreError::HistoryBusy)
            } else {
                Ok(())
            };
            if let Err(err) = checked {
                return Err(s.record_error(err, events));
            }
            let target = match direction {
                Direction::Undo => s.history.undo_target(),
                Direction::Redo => s.history.redo_target(),
            }
            .cloned();
            if target.is_some() {
                s.history_step = true;
            }
            Ok(target.map(|command| (command, s.generation)))
        })?;

        let Some((command, generation)) = prepared else {
            debug!(direction = %direction, "History step is a no-op");
            return Ok(false);
        };

        let ops = match direction {
            Direction::Undo => command.undo_ops(),
            Direction::Redo => command.redo_ops(),
        };
        let results = if command.kind.is_bulk() {
            join_all(ops.iter().map(|op| self.execute(op))).await
        } else {
            let mut results = Vec::with_capacity(ops.len());
            for op in &ops {
                let result = self.execute(op).await;
                let failed = result.is_err();
                results.push(result);
                if failed {
                    break;
                }
            }
            results
        };

        self.update(|s, events| {
            if s.generation != generation {
                debug!(direction = %direction, "Discarding history step after teardown");
                return Err(StoreError::NotReady);
            }
            s.history_step = false;

            let mut moved: HashSet<ModuleName> = HashSet::new();
            let mut failures = Vec::new();
            for (op, result) in ops.iter().zip(results) {
                match result {
                    Ok(module) => {
                        s.commit(op, module, events);
                        moved.insert(op.name().clone());
                    }
                    Err(error) => {
                        s.prune_stale(op.name(), &error, events);
                        failures.push(BulkFailure {
                            name: op.name().clone(),
                            error,
                        });
                    }
                }
            }

            let complete = failures.is_empty() && moved.len() == ops.len();
            if complete {
                match direction {
                    Direction::Undo => s.history.commit_undo(),
                    Direction::Redo => s.history.commit_redo(),
                }
            } else if !moved.is_empty() {
                if let (Some(moved_part), Some(rest)) = command.split(&moved) {
                    match direction {
                        Direction::Undo => s.history.split_undo(moved_part, rest),
                        Direction::Redo => s.history.split_redo(moved_part, rest),
                    }
                }
            }
            events.push(StoreEvent::HistoryChanged);
            info!(
                direction = %direction,
                command = %command,
                moved = moved.len(),
                failed = failures.len(),
                "History step applied"
            );

            let outcome = if complete {
                s.last_error = None;
                Ok(true)
            } else {
                let err = if !command.kind.is_bulk() && failures.len() == 1 {
                    StoreError::Repository(failures.remove(0).error)
                } else {
                    StoreError::from_failures(ops.len(), failures)
                };
                Err(s.record_error(err, events))
            };
            s.drain_pending_reload(events);
            outcome
        })
    }

    /// Whether a command can be undone
    pub fn can_undo(&self) -> bool {
        self.read_state().history.can_undo()
    }

    /// Whether a command can be redone
    pub fn can_redo(&self) -> bool {
        self.read_state().history.can_redo()
    }

    /// Number of recorded commands
    pub fn history_len(&self) -> usize {
        self.read_state().history.len()
    }

    /// Number of applied commands
    pub fn history_cursor(&self) -> usize {
        self.read_state().history.cursor()
    }

    /// Recorded commands, oldest first
    pub fn history(&self) -> Vec<Command> {
        self.read_state().history.commands().to_vec()
    }

    // ---- Surrogates ----

    /// Run a surrogate standing in for the module `name` of the canonical set
    pub fn run_surrogate(
        &self,
        registry: &SurrogateRegistry,
        name: &str,
        request: SurrogateRequest,
    ) -> Result<SurrogateRun, StoreError> {
        let Some(module) = self.module(name) else {
            return self.fail(StoreError::NotFound(name.into()));
        };
        match registry.run(&module, request) {
            Ok(run) => Ok(run),
            Err(err) => self.fail(err.into()),
        }
    }

    // ---- Selection ----

    /// Select exactly one module
    pub fn select(&self, name: &str) -> Result<(), StoreError> {
        self.update(|s, events| {
            if !s.canonical.contains(name) {
                return Err(s.record_error(StoreError::NotFound(name.into()), events));
            }
            s.selection.select(name.into());
            events.push(StoreEvent::SelectionChanged);
            Ok(())
        })
    }

    /// Toggle one module in the multi-selection, entering multi-select first.
    ///
    /// Returns whether the module is selected afterwards. Unknown names can
    /// be deselected but not selected.
    pub fn toggle_selection(&self, name: &str) -> Result<bool, StoreError> {
        self.update(|s, events| {
            let already = s.selection.is_multi_mode() && s.selection.is_selected(name);
            if !already && !s.canonical.contains(name) {
                return Err(s.record_error(StoreError::NotFound(name.into()), events));
            }
            let selected = s.selection.toggle(name.into());
            events.push(StoreEvent::SelectionChanged);
            Ok(selected)
        })
    }

    /// Select exactly the visible modules, entering multi-select first
    pub fn select_all_visible(&self) -> usize {
        self.update(|s, events| {
            let visible: Vec<ModuleName> = compute_visible(&s.canonical, &s.search)
                .into_iter()
                .map(|m| m.name.clone())
                .collect();
            let count = visible.len();
            s.selection.select_all(visible);
            events.push(StoreEvent::SelectionChanged);
            count
        })
    }

    /// Enter multi-select, seeded with the single selection
    pub fn enter_multi_select(&self) {
        self.update(|s, events| {
            s.selection.enter_multi_mode();
            events.push(StoreEvent::SelectionChanged);
        });
    }

    /// Leave multi-select and clear every selection
    pub fn exit_multi_select(&self) {
        self.update(|s, events| {
            s.selection.exit_multi_mode();
            events.push(StoreEvent::SelectionChanged);
        });
    }

    /// Clear the selection without changing mode
    pub fn clear_selection(&self) {
        self.update(|s, events| {
            s.selection.clear();
            events.push(StoreEvent::SelectionChanged);
        });
    }

    // ---- Search ----

    /// Replace the free-text query
    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.update(|s, events| {
            s.search.set_query(query);
            events.push(StoreEvent::SearchChanged);
        });
    }

    /// Add or remove a status filter
    pub fn toggle_status_filter(&self, status: ModuleStatus) {
        self.update(|s, events| {
            s.search.toggle_status(status);
            events.push(StoreEvent::SearchChanged);
        });
    }

    /// Add a structured filter. Returns false if it was already active.
    pub fn add_filter(&self, filter: StructuredFilter) -> bool {
        self.update(|s, events| {
            let added = s.search.add_filter(filter);
            if added {
                events.push(StoreEvent::SearchChanged);
            }
            added
        })
    }

    /// Remove a structured filter. Returns false if it was not active.
    pub fn remove_filter(&self, filter: &StructuredFilter) -> bool {
        self.update(|s, events| {
            let removed = s.search.remove_filter(filter);
            if removed {
                events.push(StoreEvent::SearchChanged);
            }
            removed
        })
    }

    /// Drop the query and every filter
    pub fn clear_search(&self) {
        self.update(|s, events| {
            s.search.clear();
            events.push(StoreEvent::SearchChanged);
        });
    }

    // ---- Views ----

    /// Lifecycle status
    pub fn status(&self) -> StoreStatus {
        self.read_state().status.clone()
    }

    /// Connection status
    pub fn connection_status(&self) -> ConnectionStatus {
        self.read_state().connection
    }

    /// Most recent error, cleared by the next successful mutation or history step
    pub fn last_error(&self) -> Option<StoreError> {
        self.read_state().last_error.clone()
    }

    /// Copy of the canonical set
    pub fn canonical(&self) -> ModuleSet {
        self.read_state().canonical.clone()
    }

    /// One module by name
    pub fn module(&self, name: &str) -> Option<Module> {
        self.read_state().canonical.get(name).cloned()
    }

    /// Whether a mutation of this module is in flight
    pub fn is_busy(&self, name: &str) -> bool {
        self.read_state().in_flight.contains(name)
    }

    /// Current search state
    pub fn search_state(&self) -> SearchState {
        self.read_state().search.clone()
    }

    /// Modules passing the current search, in definition order
    pub fn visible_modules(&self) -> Vec<Module> {
        let s = self.read_state();
        compute_visible(&s.canonical, &s.search)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of visible modules
    pub fn result_count(&self) -> usize {
        let s = self.read_state();
        compute_visible(&s.canonical, &s.search).len()
    }

    /// Selected modules in definition order.
    ///
    /// Selection entries naming modules that no longer exist are pruned here.
    pub fn selected_modules(&self) -> Vec<Module> {
        self.update(|s, events| {
            let canonical = &s.canonical;
            let pruned = s.selection.prune(|name| canonical.contains(name));
            if pruned > 0 {
                debug!(pruned, "Pruned stale selection entries");
                events.push(StoreEvent::SelectionChanged);
            }
            s.canonical
                .iter()
                .filter(|m| s.selection.is_selected(m.name.as_str()))
                .cloned()
                .collect()
        })
    }

    /// Number of selected names, stale ones included until pruned
    pub fn selection_count(&self) -> usize {
        self.read_state().selection.count()
    }

    /// Whether `name` is selected
    pub fn is_selected(&self, name: &str) -> bool {
        self.read_state().selection.is_selected(name)
    }

    /// Single-selection pointer
    pub fn selected_id(&self) -> Option<ModuleName> {
        self.read_state().selection.selected_id().cloned()
    }

    /// Whether multi-select mode is active
    pub fn is_multi_select(&self) -> bool {
        self.read_state().selection.is_multi_mode()
    }

    /// Dependency graph of the canonical set
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::build(&self.read_state().canonical)
    }

    /// Integrity warnings of the canonical set
    pub fn integrity_warnings(&self) -> Vec<IntegrityWarning> {
        self.dependency_graph().integrity_warnings().to_vec()
    }

    /// Statistics of the canonical set
    pub fn statistics(&self) -> ModuleStatistics {
        ModuleStatistics::compute(&self.read_state().canonical)
    }
}
