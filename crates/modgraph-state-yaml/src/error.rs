use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up the directory watcher
#[derive(Error, Debug)]
pub enum WatchError {
    /// The platform watcher could not be created
    #[error("Failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    /// The modules directory could not be watched
    #[error("Failed to watch directory {}: {source}", path.display())]
    Watch {
        /// Directory that was to be watched
        path: PathBuf,
        /// Underlying notify error
        #[source]
        source: notify::Error,
    },
}
