//! Alert records and transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational - no action required. Used for lifecycle notices
    /// (e.g. event resolved), never raised by score thresholds.
    Info,
    /// Attention recommended.
    Warning,
    /// Action required.
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARN",
            AlertLevel::Critical => "CRIT",
        }
    }
}

/// A decided alert state change for one event.
///
/// Emitted exactly once per threshold crossing; re-evaluating the same
/// snapshot never re-emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "level")]
pub enum AlertTransition {
    /// Open a new alert at this level (replacing a lower open one).
    Raise(AlertLevel),
    /// Step an open alert down to this level.
    Downgrade(AlertLevel),
    /// Close the open alert.
    Clear,
}

impl AlertTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTransition::Raise(_) => "raise",
            AlertTransition::Downgrade(_) => "downgrade",
            AlertTransition::Clear => "clear",
        }
    }
}

/// An alert's recorded lifetime.
///
/// An event has at most one open (uncleared) record at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub event_id: EventId,
    pub level: AlertLevel,
    pub raised_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    /// `cycle` of the snapshot that triggered the raise.
    pub triggering_cycle: u64,
}

impl AlertRecord {
    pub fn open(event_id: EventId, level: AlertLevel, raised_at: DateTime<Utc>, cycle: u64) -> Self {
        Self {
            event_id,
            level,
            raised_at,
            cleared_at: None,
            triggering_cycle: cycle,
        }
    }

    pub fn is_open(&self) -> bool {
        self.cleared_at.is_none()
    }
}
