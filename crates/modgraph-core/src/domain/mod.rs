/// Module data model
pub mod module;

/// Repository trait for persistence
pub mod repository;

/// Reload and store events
pub mod events;

/// Dependency graph analysis
pub mod graph;
