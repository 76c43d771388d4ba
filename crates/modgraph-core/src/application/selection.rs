//! Selection manager
//!
//! Tracks single and multi selection over module names. Selection is
//! independent of filtering and may hold names that no longer exist.

use std::collections::HashSet;

use crate::domain::module::ModuleName;

/// Single and multi selection state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionManager {
    multi_mode: bool,
    selected_id: Option<ModuleName>,
    selected_ids: HashSet<ModuleName>,
}

impl SelectionManager {
    /// Create an empty selection in single mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether multi-select mode is active
    pub fn is_multi_mode(&self) -> bool {
        self.multi_mode
    }

    /// The single-selection pointer (most recently selected id)
    pub fn selected_id(&self) -> Option<&ModuleName> {
        self.selected_id.as_ref()
    }

    /// Selected names. In single mode this holds at most the pointer.
    pub fn selected_ids(&self) -> Vec<&ModuleName> {
        if self.multi_mode {
            self.selected_ids.iter().collect()
        } else {
            self.selected_id.iter().collect()
        }
    }

    /// Whether `name` is selected
    pub fn is_selected(&self, name: &str) -> bool {
        if self.multi_mode {
            self.selected_ids.contains(name)
        } else {
            self.selected_id.as_ref().is_some_and(|id| id.as_str() == name)
        }
    }

    /// Number of selected names, stale ones included
    pub fn count(&self) -> usize {
        if self.multi_mode {
            self.selected_ids.len()
        } else {
            usize::from(self.selected_id.is_some())
        }
    }

    /// Select exactly one name, replacing any previous selection
    pub fn select(&mut self, name: ModuleName) {
        if self.multi_mode {
            self.selected_ids.clear();
            self.selected_ids.insert(name.clone());
        }
        self.selected_id = Some(name);
    }

    /// Enter multi mode, seeding it with the current single selection
    pub fn enter_multi_mode(&mut self) {
        if self.multi_mode {
            return;
        }
        self.multi_mode = true;
        self.selected_ids = self.selected_id.iter().cloned().collect();
    }

    /// Leave multi mode and clear every selection
    pub fn exit_multi_mode(&mut self) {
        self.multi_mode = false;
        self.clear();
    }

    /// Add `name` if absent, remove it if present. Enters multi mode first.
    ///
    /// Returns whether `name` is selected afterwards.
    pub fn toggle(&mut self, name: ModuleName) -> bool {
        self.enter_multi_mode();
        if self.selected_ids.remove(&name) {
            if self.selected_id.as_ref() == Some(&name) {
                self.selected_id = None;
            }
            false
        } else {
            self.selected_ids.insert(name.clone());
            self.selected_id = Some(name);
            true
        }
    }

    /// Replace the multi selection with exactly `visible`. Enters multi mode first.
    pub fn select_all<I>(&mut self, visible: I)
    where
        I: IntoIterator<Item = ModuleName>,
    {
        self.enter_multi_mode();
        self.selected_ids = visible.into_iter().collect();
        if let Some(id) = &self.selected_id {
            if !self.selected_ids.contains(id) {
                self.selected_id = None;
            }
        }
    }

    /// Clear the selection without leaving the current mode
    pub fn clear(&mut self) {
        self.selected_id = None;
        self.selected_ids.clear();
    }

    /// Drop one name from the selection. Returns whether anything changed.
    pub fn deselect(&mut self, name: &str) -> bool {
        let mut changed = self.selected_ids.remove(name);
        if self.selected_id.as_ref().is_some_and(|id| id.as_str() == name) {
            self.selected_id = None;
            changed = true;
        }
        changed
    }

    /// Drop every name for which `known` is false. Returns the number of names dropped.
    pub fn prune<F>(&mut self, known: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.count();
        self.selected_ids.retain(|name| known(name.as_str()));
        if self.selected_id.as_ref().is_some_and(|id| !known(id.as_str())) {
            self.selected_id = None;
        }
        before - self.count()
    }
}
