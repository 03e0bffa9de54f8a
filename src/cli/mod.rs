//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};

pub mod config;
pub mod run;
pub mod status;

/// Pausegate Agent - activity-gated pause coordination.
#[derive(Parser, Debug)]
#[command(name = "pausegate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level
    #[arg(long, default_value = "info", env = "PAUSEGATE_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Path to config file
    #[arg(long, env = "PAUSEGATE_CONFIG")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent in the foreground
    Run,

    /// Show the current observation and derived mode
    Status,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate configuration file
    Validate,

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}
