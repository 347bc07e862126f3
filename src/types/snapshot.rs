//! Risk score snapshots: the engine's externally-visible scoring output.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, SourceKind};

/// Human-readable bucket for a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    /// Bucket a composite score in [0, 1].
    pub fn from_score(score: f64) -> Self {
        if score <= 0.25 {
            RiskCategory::Low
        } else if score <= 0.5 {
            RiskCategory::Medium
        } else if score <= 0.75 {
            RiskCategory::High
        } else {
            RiskCategory::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
            RiskCategory::Critical => "critical",
        }
    }
}

/// One computed composite risk score for one event.
///
/// Append-only history per event; `cycle` increases by one per recompute and
/// `computed_at` is non-decreasing within an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub event_id: EventId,
    /// Per-event recompute counter. Used for evaluator idempotence.
    pub cycle: u64,
    pub computed_at: DateTime<Utc>,
    /// Weighted composite risk in [0, 1].
    pub composite_score: f64,
    pub category: RiskCategory,
    /// Sources that contributed to this score.
    pub contributing: BTreeSet<SourceKind>,
    /// Per-source staleness at compute time (present-but-stale sources).
    pub staleness: BTreeMap<SourceKind, bool>,
    /// True when no source survived and the previous score was carried
    /// forward unchanged. No alert transition is evaluated on such cycles.
    pub carried_forward: bool,
}

impl RiskSnapshot {
    /// Whether any source actually contributed fresh data.
    pub fn is_degraded(&self) -> bool {
        self.carried_forward || self.contributing.is_empty()
    }
}
