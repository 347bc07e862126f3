//! Signals: timestamped, confidence-scored observations from one data source.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a monitored protocol-upgrade event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of data source a signal originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Annualized price-volatility forecast (fraction, e.g. 0.8 = 80%).
    Volatility,
    /// Text-sentiment score in [-1, 1].
    Sentiment,
    /// Governance proposal state, encoded as a state code.
    Governance,
    /// Technical/network indicator, pre-scaled to [0, 1] by the adapter.
    Technical,
}

impl SourceKind {
    /// All source kinds, in base-weight order.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Volatility,
        SourceKind::Sentiment,
        SourceKind::Governance,
        SourceKind::Technical,
    ];

    /// Short label for logging/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Volatility => "volatility",
            SourceKind::Sentiment => "sentiment",
            SourceKind::Governance => "governance",
            SourceKind::Technical => "technical",
        }
    }

    /// Whether a first report from this source creates a new tracked event.
    ///
    /// Upgrade events enter the system through governance proposals or
    /// technical/network detection; market feeds only enrich known events.
    pub fn discovers_events(&self) -> bool {
        matches!(self, SourceKind::Governance | SourceKind::Technical)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governance proposal state as reported by governance platforms.
///
/// Carried inside `Signal::raw_value` as a small integer code so governance
/// signals share the numeric signal envelope with the other sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceState {
    Pending,
    Active,
    Passed,
    Contested,
    Rejected,
    /// Upgrade executed on-chain. Resolves the event.
    Executed,
}

impl GovernanceState {
    /// Encode as a signal raw value.
    pub fn code(&self) -> f64 {
        match self {
            GovernanceState::Pending => 0.0,
            GovernanceState::Active => 1.0,
            GovernanceState::Passed => 2.0,
            GovernanceState::Contested => 3.0,
            GovernanceState::Rejected => 4.0,
            GovernanceState::Executed => 5.0,
        }
    }

    /// Decode from a signal raw value. Returns `None` for unknown codes.
    pub fn from_code(raw: f64) -> Option<Self> {
        match raw as i64 {
            0 if raw == 0.0 => Some(GovernanceState::Pending),
            1 if raw == 1.0 => Some(GovernanceState::Active),
            2 if raw == 2.0 => Some(GovernanceState::Passed),
            3 if raw == 3.0 => Some(GovernanceState::Contested),
            4 if raw == 4.0 => Some(GovernanceState::Rejected),
            5 if raw == 5.0 => Some(GovernanceState::Executed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceState::Pending => "pending",
            GovernanceState::Active => "active",
            GovernanceState::Passed => "passed",
            GovernanceState::Contested => "contested",
            GovernanceState::Rejected => "rejected",
            GovernanceState::Executed => "executed",
        }
    }
}

/// One observation from one data source about one event.
///
/// Immutable once created. A confidence of exactly 0 means "unusable, treat
/// as absent": the bus still accepts it (it advances the source's sequence
/// and counts as event liveness) but the scorer ignores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub event_id: EventId,
    pub source: SourceKind,
    pub raw_value: f64,
    /// Producer confidence in [0, 1].
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
    /// Per-(event, source) monotonic sequence number.
    pub sequence_no: u64,
}

impl Signal {
    /// Interpret the raw value as a governance state, if this is a
    /// governance signal with a known code.
    pub fn governance_state(&self) -> Option<GovernanceState> {
        if self.source == SourceKind::Governance {
            GovernanceState::from_code(self.raw_value)
        } else {
            None
        }
    }

    /// Whether the signal is usable for scoring at all.
    pub fn is_usable(&self) -> bool {
        self.confidence > 0.0
    }
}

/// Latest accepted signal per source for one event.
///
/// Invariant: at most one live signal per source, with the highest accepted
/// `sequence_no` for that source.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    signals: HashMap<SourceKind, Signal>,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest signal for a source, if any.
    pub fn get(&self, source: SourceKind) -> Option<&Signal> {
        self.signals.get(&source)
    }

    /// Insert or replace the signal for its source.
    ///
    /// Caller (the bus) is responsible for sequence enforcement; this is a
    /// plain map write.
    pub fn insert(&mut self, signal: Signal) {
        self.signals.insert(signal.source, signal);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_state_codes_round_trip() {
        for state in [
            GovernanceState::Pending,
            GovernanceState::Active,
            GovernanceState::Passed,
            GovernanceState::Contested,
            GovernanceState::Rejected,
            GovernanceState::Executed,
        ] {
            assert_eq!(GovernanceState::from_code(state.code()), Some(state));
        }
    }

    #[test]
    fn governance_state_rejects_unknown_codes() {
        assert_eq!(GovernanceState::from_code(6.0), None);
        assert_eq!(GovernanceState::from_code(-1.0), None);
        assert_eq!(GovernanceState::from_code(2.5), None);
        assert_eq!(GovernanceState::from_code(f64::NAN), None);
    }

    #[test]
    fn discovery_sources() {
        assert!(SourceKind::Governance.discovers_events());
        assert!(SourceKind::Technical.discovers_events());
        assert!(!SourceKind::Volatility.discovers_events());
        assert!(!SourceKind::Sentiment.discovers_events());
    }

    #[test]
    fn signal_set_keeps_one_per_source() {
        let mut set = SignalSet::new();
        let mk = |seq| Signal {
            event_id: EventId::from("evt-1"),
            source: SourceKind::Volatility,
            raw_value: 0.5,
            confidence: 1.0,
            produced_at: Utc::now(),
            sequence_no: seq,
        };
        set.insert(mk(1));
        set.insert(mk(2));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(SourceKind::Volatility).unwrap().sequence_no, 2);
    }
}
