// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the service (default)
//! - `validate`: Validate the configuration and print the storage mode
//! - `inspect`: Print the snapshot held by the configured backend
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "tally.yaml";

// =============================================================================
// Main CLI Structure
// =============================================================================

/// tally - in-memory gauges and counters with durable snapshots
#[derive(Parser, Debug)]
#[command(
    name = "tally",
    author = "Sylvex <contact@sylvex.io>",
    version = tally_core::VERSION,
    about = "In-memory metric registry with file or SQLite persistence",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path. When omitted, `tally.yaml` is used if present,
    /// otherwise built-in defaults.
    #[arg(short, long, env = "TALLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format. Overrides the config file.
    #[arg(long, env = "TALLY_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands for the tally CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the service
    ///
    /// Restores the registry from the configured backend, flushes on the
    /// configured schedule, and performs a final flush on SIGINT/SIGTERM.
    Run,

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Print the snapshot stored by the configured backend
    Inspect(InspectArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show the effective configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `inspect` command.
#[derive(Args, Debug, Clone, Default)]
pub struct InspectArgs {
    /// Output format for the snapshot
    #[arg(short, long, default_value = "json")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<tally_config::LogFormat> for LogFormat {
    fn from(format: tally_config::LogFormat) -> Self {
        match format {
            tally_config::LogFormat::Text => LogFormat::Text,
            tally_config::LogFormat::Json => LogFormat::Json,
            tally_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }

    /// Returns the log level to use, given the level from the config file.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Returns the log format to use, given the format from the config file.
    pub fn effective_log_format(&self, configured: tally_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================
