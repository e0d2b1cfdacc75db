// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The binary is a thin stdio adapter around the worker: job descriptors are
//! read as JSON lines from stdin and responses are written as JSON lines to
//! stdout.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `execworker`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "execworker",
    version,
    about = "Run commands under a validated identity with a deadline, streaming output back.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the worker config file (TOML).
    ///
    /// If omitted, built-in defaults are used.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EXECWORKER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it, and exit without reading jobs.
    #[arg(long)]
    pub check_config: bool,
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
