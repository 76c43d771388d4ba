//! Structured logging using tracing.
//!
//! Logs go to stderr so command output on stdout stays clean. `RUST_LOG`
//! overrides the configured filter when set.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives (e.g., "info,modgraph_core=debug")
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Config with the given filter and pretty output
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            json: false,
        }
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter)
                .with_context(|| format!("Invalid log filter '{}'", self.filter)),
        }
    }
}

/// Initialize structured logging as the global default subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter()?);

    let result = if config.json {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr);
        registry.with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);
        registry.with(fmt_layer).try_init()
    };
    result.context("Failed to set global default subscriber")?;

    info!(
        filter = %config.filter,
        log_format = if config.json { "json" } else { "pretty" },
        "Logging initialized"
    );
    Ok(())
}

/// Trait to add log context to results
pub trait LogExt<T, E> {
    /// Log the error with `message` before returning it
    fn log_err(self, message: &str) -> Result<T, E>;
}

impl<T, E: std::fmt::Display> LogExt<T, E> for Result<T, E> {
    fn log_err(self, message: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!(error = %e, "{}", message);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_deserialize() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert_eq!(config.filter, "info");
        assert!(config.json);
        assert_eq!(LoggingConfig::default(), LoggingConfig::with_filter("info"));
    }

    #[test]
    fn test_log_err_passes_result_through() {
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(ok.log_err("unused"), Ok(1));
        let err: Result<u8, String> = Err("boom".into());
        assert_eq!(err.log_err("failed"), Err("boom".to_string()));
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig::with_filter("info,modgraph=loud");
        assert!(config.env_filter().is_err());
    }
}
