//! Search and filter index
//!
//! `compute_visible` is a pure function of the module set and the search
//! state. The store calls it on demand; nothing is cached between calls.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::module::{Module, ModuleSet, ModuleStatus};

/// A structured filter over one module field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum StructuredFilter {
    /// Exact status
    Status(ModuleStatus),
    /// Module lists this name among its dependencies
    Dependency(String),
    /// Exact version string
    Version(String),
    /// Case-insensitive substring of the name
    Name(String),
    /// Case-insensitive substring of the description
    Description(String),
}

impl StructuredFilter {
    /// Whether `module` passes this filter
    pub fn matches(&self, module: &Module) -> bool {
        match self {
            StructuredFilter::Status(status) => module.status == *status,
            StructuredFilter::Dependency(name) => module.depends_on(name),
            StructuredFilter::Version(version) => module.version.as_deref() == Some(version),
            StructuredFilter::Name(needle) => contains_ignore_case(module.name.as_str(), needle),
            StructuredFilter::Description(needle) => {
                contains_ignore_case(&module.description, needle)
            }
        }
    }

    /// Field name used on the wire and in `field=value` notation
    pub fn field(&self) -> &'static str {
        match self {
            StructuredFilter::Status(_) => "status",
            StructuredFilter::Dependency(_) => "dependency",
            StructuredFilter::Version(_) => "version",
            StructuredFilter::Name(_) => "name",
            StructuredFilter::Description(_) => "description",
        }
    }
}

impl fmt::Display for StructuredFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuredFilter::Status(status) => write!(f, "status={}", status),
            StructuredFilter::Dependency(v)
            | StructuredFilter::Version(v)
            | StructuredFilter::Name(v)
            | StructuredFilter::Description(v) => write!(f, "{}={}", self.field(), v),
        }
    }
}

impl FromStr for StructuredFilter {
    type Err = String;

    /// Parse `field=value`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, value) = s
            .split_once('=')
            .ok_or_else(|| format!("Expected field=value, got '{}'", s))?;
        let value = value.trim().to_string();
        match field.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(StructuredFilter::Status(value.parse()?)),
            "dependency" => Ok(StructuredFilter::Dependency(value)),
            "version" => Ok(StructuredFilter::Version(value)),
            "name" => Ok(StructuredFilter::Name(value)),
            "description" => Ok(StructuredFilter::Description(value)),
            other => Err(format!("Unknown filter field: {}", other)),
        }
    }
}

/// Query, status filters and structured filters of the current session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    /// Free-text query
    pub query: String,
    /// Allowed statuses; empty means all
    pub status_filters: HashSet<ModuleStatus>,
    /// Filters that must all match, deduplicated
    structured_filters: Vec<StructuredFilter>,
}

impl SearchState {
    /// Empty search state; everything is visible
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the free-text query
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// Add a status to the filter set, or remove it if present
    pub fn toggle_status(&mut self, status: ModuleStatus) {
        if !self.status_filters.remove(&status) {
            self.status_filters.insert(status);
        }
    }

    /// Append a structured filter. Returns false if an identical filter exists.
    pub fn add_filter(&mut self, filter: StructuredFilter) -> bool {
        if self.structured_filters.contains(&filter) {
            return false;
        }
        self.structured_filters.push(filter);
        true
    }

    /// Remove a structured filter. Returns false if it was not present.
    pub fn remove_filter(&mut self, filter: &StructuredFilter) -> bool {
        let before = self.structured_filters.len();
        self.structured_filters.retain(|f| f != filter);
        before != self.structured_filters.len()
    }

    /// Structured filters in insertion order
    pub fn structured_filters(&self) -> &[StructuredFilter] {
        &self.structured_filters
    }

    /// Drop the query and every filter
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether no constraint is active
    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty()
            && self.status_filters.is_empty()
            && self.structured_filters.is_empty()
    }

    /// Whether `module` passes the query, the status filters and every structured filter
    pub fn matches(&self, module: &Module) -> bool {
        matches_query(module, &self.query)
            && (self.status_filters.is_empty() || self.status_filters.contains(&module.status))
            && self.structured_filters.iter().all(|f| f.matches(module))
    }
}

/// Visible subset of `modules` under `search`, in definition order
pub fn compute_visible<'a>(modules: &'a ModuleSet, search: &SearchState) -> Vec<&'a Module> {
    modules.iter().filter(|m| search.matches(m)).collect()
}

fn matches_query(module: &Module, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    contains_ignore_case(module.name.as_str(), query)
        || contains_ignore_case(&module.description, query)
        || module
            .dependencies
            .iter()
            .any(|dep| contains_ignore_case(dep.as_str(), query))
        || module
            .version
            .as_deref()
            .is_some_and(|v| contains_ignore_case(v, query))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn modules() -> ModuleSet {
        vec![
            Module::new("UserAuth", "Handles login", ModuleStatus::Implemented)
                .with_version("2.1.0")
                .with_dependencies(["Database"]),
            Module::new("Other", "Renders reports", ModuleStatus::Placeholder),
            Module::new("Database", "Stores records", ModuleStatus::Error).with_version("1.0.0"),
        ]
        .into()
    }

    fn visible_names(modules: &ModuleSet, search: &SearchState) -> Vec<String> {
        compute_visible(modules, search)
            .into_iter()
            .map(|m| m.name.to_string())
            .collect()
    }

    #[test]
    fn test_query_matches_name_case_insensitively() {
        let set = modules();
        let mut search = SearchState::new();
        search.set_query("auth");

        let visible = compute_visible(&set, &search);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name.as_str(), "UserAuth");
    }

    #[test]
    fn test_query_matches_description_dependency_and_version() {
        let set = modules();
        let mut search = SearchState::new();

        search.set_query("LOGIN");
        assert_eq!(visible_names(&set, &search), vec!["UserAuth"]);

        search.set_query("database");
        assert_eq!(visible_names(&set, &search), vec!["UserAuth", "Database"]);

        search.set_query("1.0");
        assert_eq!(visible_names(&set, &search), vec!["UserAuth", "Database"]);
    }

    #[test]
    fn test_status_filters_are_ored() {
        let set = modules();
        let mut search = SearchState::new();
        search.toggle_status(ModuleStatus::Placeholder);
        search.toggle_status(ModuleStatus::Error);
        assert_eq!(visible_names(&set, &search), vec!["Other", "Database"]);

        search.toggle_status(ModuleStatus::Error);
        assert_eq!(visible_names(&set, &search), vec!["Other"]);
    }

    #[test]
    fn test_structured_filters_are_anded_and_deduplicated() {
        let set = modules();
        let mut search = SearchState::new();
        assert!(search.add_filter(StructuredFilter::Dependency("Database".into())));
        assert!(!search.add_filter(StructuredFilter::Dependency("Database".into())));
        assert_eq!(search.structured_filters().len(), 1);
        assert_eq!(visible_names(&set, &search), vec!["UserAuth"]);

        search.add_filter(StructuredFilter::Version("1.0.0".into()));
        assert!(visible_names(&set, &search).is_empty());

        assert!(search.remove_filter(&StructuredFilter::Dependency("Database".into())));
        assert_eq!(visible_names(&set, &search), vec!["Database"]);
    }

    #[test]
    fn test_all_constraints_intersect() {
        let set = modules();
        let mut search = SearchState::new();
        search.set_query("e");
        search.toggle_status(ModuleStatus::Implemented);
        search.toggle_status(ModuleStatus::Error);
        search.add_filter(StructuredFilter::Name("data".into()));
        assert_eq!(visible_names(&set, &search), vec!["Database"]);
    }

    #[test]
    fn test_compute_visible_is_idempotent() {
        let set = modules();
        let mut search = SearchState::new();
        search.set_query("o");
        let first = visible_names(&set, &search);
        let second = visible_names(&set, &search);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            "status=error".parse::<StructuredFilter>(),
            Ok(StructuredFilter::Status(ModuleStatus::Error))
        );
        assert_eq!(
            "Dependency = Database".parse::<StructuredFilter>(),
            Ok(StructuredFilter::Dependency("Database".into()))
        );
        assert!("owner=me".parse::<StructuredFilter>().is_err());
        assert!("status".parse::<StructuredFilter>().is_err());
        assert_eq!(StructuredFilter::Name("x".into()).to_string(), "name=x");
    }
}
