//! `modgraph` - inspect, search and watch a directory of YAML module definitions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use modgraph_core::{ModuleStatus, StructuredFilter, SurrogateRegistry};
use modgraph_monitoring::{init_logging, LogExt, LoggingConfig};
use modgraph_state_yaml::WatcherConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "modgraph")]
#[command(about = "Load, validate, search, watch and run YAML module definitions")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_filter: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate every module in a directory
    Validate {
        /// Directory containing YAML module files
        directory: PathBuf,

        /// Report dependencies on modules that do not exist
        #[arg(long)]
        validate_deps: bool,

        /// Suppress informational output
        #[arg(long)]
        quiet: bool,
    },

    /// Print statistics, resolution order and layout levels
    Stats {
        /// Directory containing YAML module files
        directory: PathBuf,
    },

    /// Print the modules matching a query and filters
    Search {
        /// Directory containing YAML module files
        directory: PathBuf,

        /// Free-text query over name, description, dependencies and version
        #[arg(short, long, default_value = "")]
        query: String,

        /// Only show modules with this status (repeatable)
        #[arg(long = "status")]
        statuses: Vec<ModuleStatus>,

        /// Structured filter as field=value (repeatable)
        #[arg(long = "filter")]
        filters: Vec<StructuredFilter>,
    },

    /// List the registered surrogates
    Surrogates,

    /// Run a surrogate standing in for one module
    Run {
        /// Directory containing YAML module files
        directory: PathBuf,

        /// Module to run
        module: String,

        /// Surrogate to use instead of the module's implementation
        #[arg(short, long)]
        surrogate: Option<String>,

        /// Inputs as a JSON object; placeholders are derived from the module when absent
        #[arg(short, long)]
        inputs: Option<String>,

        /// Surrogate options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },

    /// Keep a store in sync with the directory until interrupted
    Watch {
        /// Directory containing YAML module files
        directory: PathBuf,

        /// Quiet period before reloading, in milliseconds
        #[arg(long, default_value_t = 1000)]
        debounce_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        filter: cli.log_filter,
        json: cli.log_json,
    };
    init_logging(&logging).context("Failed to initialize logging")?;

    let mut out = std::io::stdout();
    let result = match cli.command {
        Command::Validate {
            directory,
            validate_deps,
            quiet,
        } => commands::validate(&directory, validate_deps, quiet, &mut out)
            .await
            .map(|_| ()),
        Command::Stats { directory } => commands::stats(&directory, &mut out).await,
        Command::Search {
            directory,
            query,
            statuses,
            filters,
        } => {
            let args = commands::SearchArgs {
                query,
                statuses,
                filters,
            };
            commands::search(&directory, args, &mut out).await.map(|_| ())
        }
        Command::Surrogates => commands::surrogates(&SurrogateRegistry::default(), &mut out),
        Command::Run {
            directory,
            module,
            surrogate,
            inputs,
            options,
        } => {
            let args = commands::RunArgs {
                module,
                surrogate,
                inputs,
                options,
            };
            commands::run(&directory, args, &mut out).await.map(|_| ())
        }
        Command::Watch {
            directory,
            debounce_ms,
        } => commands::watch(&directory, WatcherConfig { debounce_ms }).await,
    };
    result.log_err("Command failed")
}
