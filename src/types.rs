//! Core types for the Pausegate Agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally observable state of a gate machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Activity detected; resources play freely.
    Active,
    /// No activity within the timeout; resources paused, overlay shown.
    Inactive,
    /// Gating switched off by the user; effect sequence matches Active.
    Disabled,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Active => write!(f, "ACTIVE"),
            Mode::Inactive => write!(f, "INACTIVE"),
            Mode::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Immutable status snapshot carried by transitions and broadcasts.
///
/// The gate machine retains the most recently applied payload for derived
/// computations such as elapsed idle time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub active: bool,
    pub disabled_flag: bool,
    pub timeout_minutes: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub source_online: bool,
}

impl StatusPayload {
    /// Seconds since the last reported activity, if known.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_activity_at
            .map(|at| (now - at).num_seconds().max(0))
    }
}

impl Default for StatusPayload {
    fn default() -> Self {
        Self {
            active: true,
            disabled_flag: false,
            timeout_minutes: 15,
            last_activity_at: None,
            source_online: true,
        }
    }
}

/// A raw status observation from one of the unordered sources
/// (push channel, backend poll, activity-file read, settings change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub active: bool,
    #[serde(default)]
    pub disabled: bool,
    pub timeout_minutes: Option<u32>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub source_online: bool,
}

impl Observation {
    /// Observation emitted when the backend cannot be reached.
    ///
    /// Backend silence is treated as no observed activity; the offline flag
    /// travels as data inside the payload rather than as an error.
    pub fn offline() -> Self {
        Self {
            active: false,
            disabled: false,
            timeout_minutes: None,
            last_activity_at: None,
            source_online: false,
        }
    }
}

/// User-driven settings delta, merged over the last known observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsChange {
    pub disabled: Option<bool>,
    pub timeout_minutes: Option<u32>,
}

/// A requested mode change carrying its status snapshot.
///
/// Ephemeral: at most one is queued per machine, and a newer request
/// replaces the queued one.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: Mode,
    pub payload: StatusPayload,
}

/// Stable identity of a broadcast receiver (a tab or subscriber).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReceiverId(pub Uuid);

impl ReceiverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReceiverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a media-like resource within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
