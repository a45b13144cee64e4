// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `highstate`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "highstate",
    version,
    about = "Compile high data into ordered state chunks and run them with requisites.",
    long_about = None
)]
pub struct CliArgs {
    /// High data to compile (JSON object of declarations).
    #[arg(long, value_name = "PATH")]
    pub high: PathBuf,

    /// Path to the config file (TOML).
    ///
    /// Default: `Highstate.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ask every state function what it would change instead of changing it.
    #[arg(long)]
    pub test: bool,

    /// Compile and print the chunks, but run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep evaluating the plan against JSON events read from stdin, one
    /// per line (`{"tag": "...", "data": {...}}`).
    #[arg(long)]
    pub thorium: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HIGHSTATE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
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
