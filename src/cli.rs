// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `ferryman`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ferryman",
    version,
    about = "Move files between storage endpoints on demand, on a schedule, or when they appear.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Ferryman.toml")]
    pub config: String,

    /// Exit once every job has reached a terminal state.
    #[arg(long)]
    pub once: bool,

    /// Fire a manual trigger for this template at startup (repeatable).
    #[arg(long = "trigger", value_name = "TEMPLATE")]
    pub triggers: Vec<String>,

    /// Do not start event detectors or schedule tickers.
    #[arg(long)]
    pub no_detect: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FERRYMAN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print endpoints and templates, but don't execute anything.
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
