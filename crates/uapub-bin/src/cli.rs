// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the publisher (default)
//! - `validate`: Validate the configuration and node configuration files
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uapub - OPC UA edge telemetry publisher
///
/// Subscribes to data points on OPC UA servers and publishes their value
/// changes as batched JSON telemetry to an MQTT broker.
#[derive(Parser, Debug)]
#[command(
    name = "uapub",
    author = "Sylvex <contact@sylvex.io>",
    version = uapub_core::VERSION,
    about = "OPC UA edge telemetry publisher",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "uapub.yaml",
        env = "UAPUB_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the configuration
    #[arg(short, long, env = "UAPUB_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json, compact); overrides the configuration
    #[arg(long, env = "UAPUB_LOG_FORMAT", global = true)]
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

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the publisher
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration
    ///
    /// Parses and validates the configuration file and the node configuration
    /// file it references, without connecting to anything.
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
    /// Node configuration file, overriding the configured path
    #[arg(short, long, env = "UAPUB_NODE_CONFIG")]
    pub nodes: Option<PathBuf>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
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

impl From<uapub_config::LogFormat> for LogFormat {
    fn from(format: uapub_config::LogFormat) -> Self {
        match format {
            uapub_config::LogFormat::Text => LogFormat::Text,
            uapub_config::LogFormat::Json => LogFormat::Json,
            uapub_config::LogFormat::Compact => LogFormat::Compact,
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
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Get the effective log level.
    ///
    /// `-q` and `-v` win over `--log-level`, which wins over `configured`.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Get the effective log format.
    pub fn effective_log_format(&self, configured: uapub_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

impl Default for ValidateArgs {
    fn default() -> Self {
        Self {
            show_config: false,
            format: OutputFormat::Text,
            strict: false,
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
        let cli = Cli::parse_from(["uapub"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_with_nodes() {
        let cli = Cli::parse_from(["uapub", "run", "--nodes", "/data/pn.json"]);
        if let Some(Commands::Run(args)) = cli.command {
            assert_eq!(args.nodes, Some(PathBuf::from("/data/pn.json")));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["uapub", "validate", "--show-config", "-f", "json"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show_config);
            assert_eq!(args.format, OutputFormat::Json);
            assert!(!args.strict);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["uapub", "-c", "/etc/uapub/uapub.yaml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/uapub/uapub.yaml"));
    }

    #[test]
    fn test_log_level_overrides_configuration() {
        let cli = Cli::parse_from(["uapub", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("info"), "trace");

        let cli = Cli::parse_from(["uapub"]);
        assert_eq!(cli.effective_log_level("error"), "error");
    }

    #[test]
    fn test_quiet_and_verbose() {
        let cli = Cli::parse_from(["uapub", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("info"), "warn");

        let cli = Cli::parse_from(["uapub", "-v"]);
        assert_eq!(cli.effective_log_level("info"), "debug");
    }

    #[test]
    fn test_log_format() {
        let cli = Cli::parse_from(["uapub", "--log-format", "json"]);
        assert_eq!(
            cli.effective_log_format(uapub_config::LogFormat::Text),
            LogFormat::Json
        );

        let cli = Cli::parse_from(["uapub"]);
        assert_eq!(
            cli.effective_log_format(uapub_config::LogFormat::Compact),
            LogFormat::Compact
        );
    }

    #[test]
    fn test_version_command() {
        let cli = Cli::parse_from(["uapub", "version"]);
        assert!(matches!(cli.command, Some(Commands::Version)));
    }
}
