//! Command history (undo/redo)
//!
//! Commands are recorded as data rather than closures: every entity a command
//! touched is stored as a before/after snapshot pair, so the inverse of a
//! command never depends on the partial payload that produced it.
//!
//! The history is linear. Commands below the cursor are applied and undoable;
//! commands at or above it are redoable.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::module::{Module, ModuleName, ModulePatch, ModuleStatus};

/// Value object: Command ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub Uuid);

impl CommandId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// What user intent produced a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Create one module
    Create,
    /// Update one module
    Update,
    /// Delete one module
    Delete,
    /// Rename a module (delete + create)
    Rename {
        /// Former name
        from: ModuleName,
        /// New name
        to: ModuleName,
    },
    /// Set the status of every selected module
    BulkUpdateStatus(ModuleStatus),
    /// Delete every selected module
    BulkDelete,
}

impl CommandKind {
    /// Whether the command's repository calls are issued concurrently
    pub fn is_bulk(&self) -> bool {
        matches!(self, CommandKind::BulkUpdateStatus(_) | CommandKind::BulkDelete)
    }
}

/// Before/after snapshot of one entity touched by a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChange {
    /// Module name
    pub name: ModuleName,
    /// Module before the command; `None` if the command created it
    pub before: Option<Module>,
    /// Module after the command; `None` if the command deleted it
    pub after: Option<Module>,
    /// Index of the module in definition order on whichever side it exists
    pub position: usize,
}

impl ModuleChange {
    /// Change that created `module` at `position`
    pub fn created(module: Module, position: usize) -> Self {
        Self {
            name: module.name.clone(),
            before: None,
            after: Some(module),
            position,
        }
    }

    /// Change that replaced `before` with `after`
    pub fn updated(before: Module, after: Module, position: usize) -> Self {
        Self {
            name: after.name.clone(),
            before: Some(before),
            after: Some(after),
            position,
        }
    }

    /// Change that deleted `module` from `position`
    pub fn deleted(module: Module, position: usize) -> Self {
        Self {
            name: module.name.clone(),
            before: Some(module),
            after: None,
            position,
        }
    }

    /// Repository operation that moves the entity from `after` back to `before`
    pub fn inverse_op(&self) -> Option<RepositoryOp> {
        RepositoryOp::between(&self.name, self.after.as_ref(), self.before.as_ref(), self.position)
    }

    /// Repository operation that moves the entity from `before` to `after`
    pub fn forward_op(&self) -> Option<RepositoryOp> {
        RepositoryOp::between(&self.name, self.before.as_ref(), self.after.as_ref(), self.position)
    }
}

/// A single repository call needed to replay one side of a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOp {
    /// Create the module and insert it at the position
    Create {
        /// Module to create
        module: Module,
        /// Position in definition order
        position: usize,
    },
    /// Overwrite every mutable field of an existing module
    Update {
        /// Module name
        name: ModuleName,
        /// Full-snapshot patch
        patch: ModulePatch,
    },
    /// Delete the module
    Delete {
        /// Module name
        name: ModuleName,
    },
}

impl RepositoryOp {
    fn between(
        name: &ModuleName,
        from: Option<&Module>,
        to: Option<&Module>,
        position: usize,
    ) -> Option<Self> {
        match (from, to) {
            (None, Some(module)) => Some(RepositoryOp::Create {
                module: module.clone(),
                position,
            }),
            (Some(_), None) => Some(RepositoryOp::Delete { name: name.clone() }),
            (Some(current), Some(target)) if current != target => Some(RepositoryOp::Update {
                name: name.clone(),
                patch: ModulePatch::from(target),
            }),
            _ => None,
        }
    }

    /// Module the operation targets
    pub fn name(&self) -> &ModuleName {
        match self {
            RepositoryOp::Create { module, .. } => &module.name,
            RepositoryOp::Update { name, .. } | RepositoryOp::Delete { name } => name,
        }
    }
}

/// A recorded, reversible mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Unique id
    pub id: CommandId,
    /// Intent that produced it
    pub kind: CommandKind,
    /// Every entity touched, in application order
    pub changes: Vec<ModuleChange>,
    /// When the command was first applied
    pub recorded_at: DateTime<Utc>,
}

impl Command {
    /// Record a new command
    pub fn new(kind: CommandKind, changes: Vec<ModuleChange>) -> Self {
        Self {
            id: CommandId::new(),
            kind,
            changes,
            recorded_at: Utc::now(),
        }
    }

    /// Names of every entity touched
    pub fn names(&self) -> Vec<ModuleName> {
        self.changes.iter().map(|c| c.name.clone()).collect()
    }

    /// Operations that undo the command, last change first
    pub fn undo_ops(&self) -> Vec<RepositoryOp> {
        self.changes.iter().rev().filter_map(ModuleChange::inverse_op).collect()
    }

    /// Operations that redo the command, in application order
    pub fn redo_ops(&self) -> Vec<RepositoryOp> {
        self.changes.iter().filter_map(ModuleChange::forward_op).collect()
    }

    /// Split into the changes for `moved` names and the rest.
    ///
    /// Both halves keep the timestamp and get new ids. Bulk halves keep the
    /// bulk kind; a rename half holds one side only and is relabelled as the
    /// create or delete it is.
    pub fn split(&self, moved: &HashSet<ModuleName>) -> (Option<Command>, Option<Command>) {
        let (hit, rest): (Vec<_>, Vec<_>) = self
            .changes
            .iter()
            .cloned()
            .partition(|c| moved.contains(&c.name));
        let half = |changes: Vec<ModuleChange>| {
            (!changes.is_empty()).then(|| Command {
                id: CommandId::new(),
                kind: self.half_kind(&changes),
                changes,
                recorded_at: self.recorded_at,
            })
        };
        (half(hit), half(rest))
    }

    fn half_kind(&self, changes: &[ModuleChange]) -> CommandKind {
        if self.kind.is_bulk() {
            return self.kind.clone();
        }
        if changes.iter().all(|c| c.before.is_none()) {
            CommandKind::Create
        } else if changes.iter().all(|c| c.after.is_none()) {
            CommandKind::Delete
        } else {
            CommandKind::Update
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Create => write!(f, "Create {}", join_names(&self.changes)),
            CommandKind::Update => write!(f, "Update {}", join_names(&self.changes)),
            CommandKind::Delete => write!(f, "Delete {}", join_names(&self.changes)),
            CommandKind::Rename { from, to } => write!(f, "Rename {} to {}", from, to),
            CommandKind::BulkUpdateStatus(status) => write!(
                f,
                "Set status of {} modules to {}",
                self.changes.len(),
                status
            ),
            CommandKind::BulkDelete => write!(f, "Delete {} modules", self.changes.len()),
        }
    }
}

fn join_names(changes: &[ModuleChange]) -> String {
    changes
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Linear undo/redo history with a cursor
#[derive(Debug, Clone)]
pub struct CommandHistory {
    commands: Vec<Command>,
    cursor: usize,
    limit: usize,
}

impl CommandHistory {
    /// Create an empty history keeping at most `limit` commands
    pub fn new(limit: usize) -> Self {
        Self {
            commands: Vec::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Number of recorded commands, redoable ones included
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of applied commands
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether a command can be undone
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Whether a command can be redone
    pub fn can_redo(&self) -> bool {
        self.cursor < self.commands.len()
    }

    /// Recorded commands, oldest first
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Record an applied command, discarding everything redoable
    pub fn push(&mut self, command: Command) {
        self.commands.truncate(self.cursor);
        self.commands.push(command);
        self.cursor = self.commands.len();
        self.trim();
    }

    // Drop the oldest commands beyond the limit
    fn trim(&mut self) {
        if self.commands.len() > self.limit {
            let excess = self.commands.len() - self.limit;
            self.commands.drain(0..excess);
            self.cursor = self.cursor.saturating_sub(excess);
        }
    }

    /// Next command to undo
    pub fn undo_target(&self) -> Option<&Command> {
        self.cursor.checked_sub(1).and_then(|i| self.commands.get(i))
    }

    /// Next command to redo
    pub fn redo_target(&self) -> Option<&Command> {
        self.commands.get(self.cursor)
    }

    /// Mark the undo target as undone
    pub fn commit_undo(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Mark the redo target as redone
    pub fn commit_redo(&mut self) {
        if self.cursor < self.commands.len() {
            self.cursor += 1;
        }
    }

    /// Record a partially successful undo.
    ///
    /// `reverted` holds the changes that were undone and becomes the next
    /// redoable command; `applied` holds the changes still in effect and stays
    /// the next undoable command.
    pub fn split_undo(&mut self, reverted: Command, applied: Command) {
        let Some(index) = self.cursor.checked_sub(1) else {
            return;
        };
        self.commands[index] = applied;
        self.commands.insert(self.cursor, reverted);
        self.trim();
    }

    /// Record a partially successful redo.
    ///
    /// `applied` holds the changes that were redone and becomes the last
    /// undoable command; `pending` stays the next redoable command.
    pub fn split_redo(&mut self, applied: Command, pending: Command) {
        if self.cursor >= self.commands.len() {
            return;
        }
        self.commands[self.cursor] = pending;
        self.commands.insert(self.cursor, applied);
        self.cursor += 1;
        self.trim();
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.commands.clear();
        self.cursor = 0;
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, status: ModuleStatus) -> Module {
        Module::new(name, "test", status)
    }

    fn update_command(name: &str) -> Command {
        Command::new(
            CommandKind::Update,
            vec![ModuleChange::updated(
                module(name, ModuleStatus::Placeholder),
                module(name, ModuleStatus::Implemented),
                0,
            )],
        )
    }

    #[test]
    fn test_push_discards_redoable() {
        let mut history = CommandHistory::new(10);
        history.push(update_command("A"));
        history.push(update_command("B"));
        history.commit_undo();
        assert!(history.can_redo());

        history.push(update_command("C"));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(history.undo_target().unwrap().names(), vec![ModuleName::from("C")]);
    }

    #[test]
    fn test_cursor_bounds() {
        let mut history = CommandHistory::new(10);
        assert!(history.undo_target().is_none());
        assert!(history.redo_target().is_none());
        history.commit_undo();
        assert_eq!(history.cursor(), 0);

        history.push(update_command("A"));
        history.commit_redo();
        assert_eq!(history.cursor(), 1);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = CommandHistory::new(2);
        history.push(update_command("A"));
        history.push(update_command("B"));
        history.push(update_command("C"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 2);
        assert_eq!(history.commands()[0].names(), vec![ModuleName::from("B")]);
    }

    #[test]
    fn test_ops_are_derived_from_snapshots() {
        let created = ModuleChange::created(module("N", ModuleStatus::Placeholder), 3);
        assert_eq!(
            created.inverse_op(),
            Some(RepositoryOp::Delete { name: "N".into() })
        );
        assert!(matches!(
            created.forward_op(),
            Some(RepositoryOp::Create { position: 3, .. })
        ));

        let deleted = ModuleChange::deleted(module("D", ModuleStatus::Error), 1);
        match deleted.inverse_op() {
            Some(RepositoryOp::Create { module, position }) => {
                assert_eq!(module.status, ModuleStatus::Error);
                assert_eq!(position, 1);
            }
            other => panic!("Expected Create, got {:?}", other),
        }

        let updated = update_command("U");
        match &updated.undo_ops()[..] {
            [RepositoryOp::Update { name, patch }] => {
                assert_eq!(name.as_str(), "U");
                assert_eq!(patch.status, Some(ModuleStatus::Placeholder));
                assert_eq!(patch.description.as_deref(), Some("test"));
            }
            other => panic!("Expected one Update, got {:?}", other),
        }
    }

    #[test]
    fn test_undo_ops_run_in_reverse() {
        let command = Command::new(
            CommandKind::Rename {
                from: "Old".into(),
                to: "New".into(),
            },
            vec![
                ModuleChange::created(module("New", ModuleStatus::Placeholder), 2),
                ModuleChange::deleted(module("Old", ModuleStatus::Placeholder), 0),
            ],
        );
        let names: Vec<_> = command.undo_ops().iter().map(|op| op.name().to_string()).collect();
        assert_eq!(names, vec!["Old", "New"]);
        assert_eq!(command.to_string(), "Rename Old to New");
    }

    #[test]
    fn test_split_undo_keeps_cursor_invariant() {
        let mut history = CommandHistory::new(10);
        let bulk = Command::new(
            CommandKind::BulkUpdateStatus(ModuleStatus::Implemented),
            vec![
                ModuleChange::updated(
                    module("A", ModuleStatus::Placeholder),
                    module("A", ModuleStatus::Implemented),
                    0,
                ),
                ModuleChange::updated(
                    module("B", ModuleStatus::Error),
                    module("B", ModuleStatus::Implemented),
                    1,
                ),
            ],
        );
        history.push(bulk.clone());

        let moved: HashSet<ModuleName> = [ModuleName::from("A")].into_iter().collect();
        let (reverted, applied) = bulk.split(&moved);
        history.split_undo(reverted.unwrap(), applied.unwrap());

        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 1);
        assert_eq!(history.undo_target().unwrap().names(), vec![ModuleName::from("B")]);
        assert_eq!(history.redo_target().unwrap().names(), vec![ModuleName::from("A")]);
    }

    #[test]
    fn test_split_redo_keeps_cursor_invariant() {
        let mut history = CommandHistory::new(10);
        let bulk = Command::new(
            CommandKind::BulkDelete,
            vec![
                ModuleChange::deleted(module("A", ModuleStatus::Placeholder), 0),
                ModuleChange::deleted(module("B", ModuleStatus::Placeholder), 1),
            ],
        );
        history.push(bulk.clone());
        history.commit_undo();

        let moved: HashSet<ModuleName> = [ModuleName::from("B")].into_iter().collect();
        let (applied, pending) = bulk.split(&moved);
        history.split_redo(applied.unwrap(), pending.unwrap());

        assert_eq!(history.cursor(), 1);
        assert_eq!(history.undo_target().unwrap().names(), vec![ModuleName::from("B")]);
        assert_eq!(history.redo_target().unwrap().names(), vec![ModuleName::from("A")]);
        assert_eq!(history.redo_target().unwrap().to_string(), "Delete 1 modules");
    }

    fn rename_command() -> Command {
        Command::new(
            CommandKind::Rename {
                from: "Old".into(),
                to: "New".into(),
            },
            vec![
                ModuleChange::created(module("New", ModuleStatus::Placeholder), 0),
                ModuleChange::deleted(module("Old", ModuleStatus::Placeholder), 0),
            ],
        )
    }

    #[test]
    fn test_split_rename_relabels_halves() {
        let rename = rename_command();
        let moved: HashSet<ModuleName> = [ModuleName::from("Old")].into_iter().collect();
        let (restored, created) = rename.split(&moved);
        let (restored, created) = (restored.unwrap(), created.unwrap());

        assert_eq!(restored.kind, CommandKind::Delete);
        assert_eq!(restored.to_string(), "Delete Old");
        assert_eq!(created.kind, CommandKind::Create);
        assert_eq!(created.to_string(), "Create New");
        assert_ne!(restored.id, created.id);
    }

    #[test]
    fn test_split_respects_limit() {
        let mut history = CommandHistory::new(2);
        history.push(update_command("A"));
        let rename = rename_command();
        history.push(rename.clone());

        let moved: HashSet<ModuleName> = [ModuleName::from("Old")].into_iter().collect();
        let (reverted, applied) = rename.split(&moved);
        history.split_undo(reverted.unwrap(), applied.unwrap());

        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 1);
        assert_eq!(history.undo_target().unwrap().kind, CommandKind::Create);
        assert_eq!(history.redo_target().unwrap().kind, CommandKind::Delete);
    }
}
