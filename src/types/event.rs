//! Monitored protocol-upgrade events and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;

/// Lifecycle state of a monitored upgrade event.
///
/// `Pending → Active → {Resolved, Expired}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Known but no signal accepted yet.
    Pending,
    /// Receiving signals and being scored.
    Active,
    /// The upgrade's on-chain effective block passed.
    Resolved,
    /// No fresh signal within the inactivity window.
    Expired,
}

impl EventStatus {
    /// Terminal states stop scoring and release resources.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Resolved | EventStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Active => "active",
            EventStatus::Resolved => "resolved",
            EventStatus::Expired => "expired",
        }
    }
}

/// A protocol-upgrade event under monitoring.
///
/// Owned exclusively by the event's pipeline; every other component refers
/// to it by `event_id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeEvent {
    pub event_id: EventId,
    /// Network the upgrade targets (e.g. "ethereum", "arbitrum").
    pub network: String,
    /// Reference to the governance proposal, when known.
    pub proposal_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: EventStatus,
}

impl UpgradeEvent {
    /// Create a new pending event.
    pub fn new(event_id: EventId, network: impl Into<String>) -> Self {
        Self {
            event_id,
            network: network.into(),
            proposal_ref: None,
            created_at: Utc::now(),
            status: EventStatus::Pending,
        }
    }

    /// Event auto-created because a discovery-capable source first reported
    /// it. Network is unknown until a governance adapter fills it in.
    pub fn discovered(event_id: EventId) -> Self {
        Self::new(event_id, "unknown")
    }

    /// Builder method to attach a governance proposal reference.
    pub fn with_proposal_ref(mut self, proposal_ref: impl Into<String>) -> Self {
        self.proposal_ref = Some(proposal_ref.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::Active.is_terminal());
        assert!(EventStatus::Resolved.is_terminal());
        assert!(EventStatus::Expired.is_terminal());
    }

    #[test]
    fn new_event_is_pending() {
        let event = UpgradeEvent::new(EventId::from("eip-4844"), "ethereum")
            .with_proposal_ref("snapshot:0xabc");
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.proposal_ref.as_deref(), Some("snapshot:0xabc"));
    }
}
