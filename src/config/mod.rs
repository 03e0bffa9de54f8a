//! Configuration management for the Pausegate Agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

pub mod paths;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the config file (set after loading)
    #[serde(skip)]
    pub path: PathBuf,

    /// Agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Observation source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Gate behavior configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Broadcast configuration
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Config {
    /// Load configuration from the default path or environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = paths::config_file();
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(format!("{}: {}", path.display(), e)))?;

        let mut config: Config = toml::from_str(&content)?;

        config.path = path.clone();

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.endpoint.is_none() && self.source.activity_file.is_none() {
            return Err(ConfigError::Invalid(
                "no observation source configured: set source.endpoint or source.activity_file"
                    .to_string(),
            ));
        }
        if let Some(endpoint) = &self.source.endpoint {
            if endpoint.is_empty() {
                return Err(ConfigError::Invalid("source.endpoint is empty".to_string()));
            }
        }
        if self.source.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "source.poll_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.gate.timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "gate.timeout_minutes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            agent: AgentConfig::default(),
            source: SourceConfig::default(),
            gate: GateConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Agent-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier for this agent instance ("auto" = generate from hostname)
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_agent_id() -> String {
    "auto".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            log_level: default_log_level(),
        }
    }
}

/// Observation source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Backend status endpoint URL
    pub endpoint: Option<String>,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Local activity reporter persistence file (fallback source)
    pub activity_file: Option<String>,

    /// Re-read interval for the activity file in seconds
    #[serde(default = "default_file_scan_interval")]
    pub file_scan_interval_seconds: u64,

    /// Use filesystem events as re-read hints for the activity file
    #[serde(default = "default_true")]
    pub use_file_events: bool,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_file_scan_interval() -> u64 {
    10
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            poll_interval_seconds: default_poll_interval(),
            activity_file: None,
            file_scan_interval_seconds: default_file_scan_interval(),
            use_file_events: true,
        }
    }
}

/// Gate behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Inactivity timeout in minutes, used when an observation carries none
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
}

fn default_timeout_minutes() -> u32 {
    15
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

/// Broadcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Per-receiver channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}
