//! Logging setup for modgraph binaries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;

pub use logging::{init_logging, LogExt, LoggingConfig};
