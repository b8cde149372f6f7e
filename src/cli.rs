// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dagflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagflow",
    version,
    about = "Run a workflow DAG of shell, Spark and dependent tasks on this node.",
    long_about = None
)]
pub struct CliArgs {
    /// Workflow definition (JSON).
    #[arg(long, value_name = "PATH")]
    pub workflow: PathBuf,

    /// Path to the config file (TOML).
    ///
    /// Default: `Dagflow.toml` in the current working directory if present,
    /// built-in defaults otherwise.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Id this workflow definition is recorded under.
    #[arg(long, value_name = "ID", default_value_t = 1)]
    pub definition_id: i64,

    /// Run tasks as this OS user (overrides `[worker].tenant`).
    #[arg(long, value_name = "USER")]
    pub tenant: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print the execution order, run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
