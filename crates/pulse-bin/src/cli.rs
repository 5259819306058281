// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! The `pulse` binary supports three subcommands:
//!
//! - `run`: start the collector (default)
//! - `validate`: validate the configuration directory
//! - `version`: show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// PULSE - PLC polling and anomaly engine
///
/// Polls industrial controllers over Modbus, FINS, and S7comm, scales the
/// readings, and persists them to the time-series store.
#[derive(Parser, Debug)]
#[command(
    name = "pulse",
    author = "Sylvex <contact@sylvex.io>",
    version = pulse_core::VERSION,
    about = "PULSE - PLC polling and anomaly engine",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration directory (holds devices.json and settings.json)
    #[arg(
        short,
        long,
        default_value = "config",
        env = "PULSE_CONFIG_DIR",
        global = true
    )]
    pub config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "PULSE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "PULSE_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

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

/// Available subcommands for the pulse CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the collector
    ///
    /// This is the default command when no subcommand is specified.
    /// It loads the device registry, connects the configured devices,
    /// and polls until a shutdown signal arrives.
    Run(RunArgs),

    /// Validate the configuration directory
    ///
    /// Parses devices.json and settings.json without starting the
    /// collector. Useful for checking configuration before deployment.
    Validate(ValidateArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Skip device connection on startup (connect lazily on first cycle)
    #[arg(long)]
    pub skip_connect: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Print the parsed device list after validation
    #[arg(short, long)]
    pub show_devices: bool,
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
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["pulse"]);
        assert!(cli.command.is_none());
        matches!(cli.effective_command(), Commands::Run(_));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["pulse", "run"]);
        assert!(matches!(cli.command, Some(Commands::Run(_))));
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["pulse", "validate", "--show-devices"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show_devices);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_config_dir() {
        let cli = Cli::parse_from(["pulse", "-c", "/etc/pulse"]);
        assert_eq!(cli.config_dir, PathBuf::from("/etc/pulse"));
    }

    #[test]
    fn test_quiet_mode() {
        let cli = Cli::parse_from(["pulse", "-q"]);
        assert!(cli.quiet);
        assert_eq!(cli.effective_log_level(), "warn");
    }

    #[test]
    fn test_verbose_mode() {
        let cli = Cli::parse_from(["pulse", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.effective_log_level(), "debug");
    }
}
