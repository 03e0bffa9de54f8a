//! Error types for the Pausegate Agent.
//!
//! No error in the coordination core is fatal: per-resource and per-receiver
//! failures are caught at the narrowest scope and logged. A superseded
//! fan-out enumeration is not an error at all; it ends with a silent early
//! return.

use thiserror::Error;

use crate::types::{ReceiverId, ResourceId};

/// Errors that can abort agent startup. Delivery and resource-effect
/// failures never escalate this far; they are logged where they happen.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file unreadable: {0}")]
    Unreadable(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors from the observation sources (poll, push, activity file).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Status body parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Activity file error: {0}")]
    ActivityFile(String),

    #[error("Filesystem notification error: {0}")]
    Notify(#[from] notify::Error),
}

/// A notifier send to one receiver failed; delivery continues with the rest.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Receiver {0} unreachable")]
    Unreachable(ReceiverId),
}

/// A pause/resume call on an individual resource failed; isolated, never
/// aborts the transition that triggered it.
#[derive(Error, Debug)]
pub enum ResourceEffectError {
    #[error("Resource {0} is in an invalid state for this effect")]
    InvalidState(ResourceId),
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
