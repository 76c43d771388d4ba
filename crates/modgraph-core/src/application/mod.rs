/// Search and filter index
pub mod search;

/// Single and multi selection
pub mod selection;

/// Undo/redo command history
pub mod history;

/// Module graph store orchestrating the other components
pub mod store;

/// Placeholder execution for unimplemented modules
pub mod surrogate;
