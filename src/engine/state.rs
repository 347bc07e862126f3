//! Per-event lifecycle state and alert hysteresis.
//!
//! Both pieces are explicit state machines owned by a single pipeline task,
//! so nothing here needs synchronization. The hysteresis tracker holds the
//! confirmation counter for pending transitions instead of scattering flags
//! across call sites.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{EngineError, Result};
use crate::types::{AlertLevel, AlertTransition, EventStatus, RiskSnapshot, UpgradeEvent};

use super::config::AlertThresholds;

/// Per-event lifecycle: status transitions plus bounded score history.
pub struct EventLifecycle {
    event: UpgradeEvent,
    history: VecDeque<RiskSnapshot>,
    history_cap: usize,
    next_cycle: u64,
    last_computed_at: Option<DateTime<Utc>>,
}

impl EventLifecycle {
    pub fn new(event: UpgradeEvent, history_cap: usize) -> Self {
        Self {
            event,
            history: VecDeque::with_capacity(history_cap.min(64)),
            history_cap,
            next_cycle: 1,
            last_computed_at: None,
        }
    }

    pub fn event(&self) -> &UpgradeEvent {
        &self.event
    }

    pub fn status(&self) -> EventStatus {
        self.event.status
    }

    pub fn latest_snapshot(&self) -> Option<&RiskSnapshot> {
        self.history.back()
    }

    /// Cycle number for the next recompute.
    pub fn next_cycle(&self) -> u64 {
        self.next_cycle
    }

    /// Clamp a wall-clock reading so `computed_at` never goes backwards
    /// within an event.
    pub fn monotonic_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_computed_at {
            Some(last) if now < last => last,
            _ => now,
        }
    }

    /// `Pending → Active` on the first accepted signal. Idempotent.
    pub fn activate(&mut self) -> Result<()> {
        match self.event.status {
            EventStatus::Pending => {
                self.event.status = EventStatus::Active;
                info!(event_id = %self.event.event_id, "event activated");
                Ok(())
            }
            EventStatus::Active => Ok(()),
            _ => Err(EngineError::EventTerminated(self.event.event_id.clone())),
        }
    }

    /// `Active → Resolved` on an explicit confirmation.
    pub fn resolve(&mut self) -> Result<()> {
        if self.event.status.is_terminal() {
            return Err(EngineError::EventTerminated(self.event.event_id.clone()));
        }
        self.event.status = EventStatus::Resolved;
        info!(event_id = %self.event.event_id, "event resolved");
        Ok(())
    }

    /// `Active → Expired` after the inactivity window.
    pub fn expire(&mut self) -> Result<()> {
        if self.event.status.is_terminal() {
            return Err(EngineError::EventTerminated(self.event.event_id.clone()));
        }
        self.event.status = EventStatus::Expired;
        info!(event_id = %self.event.event_id, "event expired");
        Ok(())
    }

    /// Append a snapshot to the bounded history.
    ///
    /// Enforces the per-event ordering invariants: strictly increasing
    /// `cycle`, non-decreasing `computed_at`. A violation means two
    /// recomputes ran concurrently for this event and aborts the pipeline.
    pub fn record_snapshot(&mut self, snapshot: RiskSnapshot) -> Result<()> {
        if snapshot.cycle != self.next_cycle {
            return Err(EngineError::Invariant(format!(
                "event {}: snapshot cycle {} != expected {}",
                self.event.event_id, snapshot.cycle, self.next_cycle
            )));
        }
        if let Some(last) = self.last_computed_at {
            if snapshot.computed_at < last {
                return Err(EngineError::Invariant(format!(
                    "event {}: computed_at went backwards",
                    self.event.event_id
                )));
            }
        }
        self.next_cycle += 1;
        self.last_computed_at = Some(snapshot.computed_at);
        self.history.push_back(snapshot);
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        Ok(())
    }
}

/// Alert hysteresis with N-cycle confirmation.
///
/// Raising to a level requires the score at/above its raise threshold for
/// `confirm_cycles` consecutive snapshots; clearing/downgrading requires it
/// below the level's clear threshold for the same streak. A change of
/// candidate resets the streak.
pub struct HysteresisTracker {
    thresholds: AlertThresholds,
    pending: Option<(AlertTransition, u32)>,
}

impl HysteresisTracker {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            pending: None,
        }
    }

    /// Drop any pending confirmation streak. Called on cycles that produce
    /// no usable score, so "consecutive" means consecutive scored cycles.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one snapshot score; returns a confirmed transition, if any.
    ///
    /// `open` is the level of the currently open alert.
    pub fn observe(&mut self, score: f64, open: Option<AlertLevel>) -> Option<AlertTransition> {
        let candidate = self.candidate(score, open);

        let Some(candidate) = candidate else {
            self.pending = None;
            return None;
        };

        let streak = match self.pending {
            Some((pending, count)) if pending == candidate => count + 1,
            _ => 1,
        };

        if streak >= self.thresholds.confirm_cycles {
            self.pending = None;
            Some(candidate)
        } else {
            self.pending = Some((candidate, streak));
            None
        }
    }

    fn candidate(&self, score: f64, open: Option<AlertLevel>) -> Option<AlertTransition> {
        let t = &self.thresholds;
        match open {
            Some(AlertLevel::Critical) => {
                if score < t.critical_clear {
                    if score >= t.warning_clear {
                        Some(AlertTransition::Downgrade(AlertLevel::Warning))
                    } else {
                        Some(AlertTransition::Clear)
                    }
                } else {
                    None
                }
            }
            Some(AlertLevel::Warning) => {
                if score >= t.critical_raise {
                    Some(AlertTransition::Raise(AlertLevel::Critical))
                } else if score < t.warning_clear {
                    Some(AlertTransition::Clear)
                } else {
                    None
                }
            }
            // No open score-driven alert (Info records are lifecycle
            // notices, not threshold alerts).
            _ => {
                if score >= t.critical_raise {
                    Some(AlertTransition::Raise(AlertLevel::Critical))
                } else if score >= t.warning_raise {
                    Some(AlertTransition::Raise(AlertLevel::Warning))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::types::EventId;

    use super::*;

    fn tracker() -> HysteresisTracker {
        HysteresisTracker::new(AlertThresholds::default())
    }

    #[test]
    fn warning_needs_two_consecutive_crossings_then_holds() {
        // [0.55, 0.62, 0.63, 0.58]: raise Warning only after two consecutive
        // >= 0.6 snapshots; no clear on the dip to 0.58 (still > 0.5).
        let mut h = tracker();
        assert_eq!(h.observe(0.55, None), None);
        assert_eq!(h.observe(0.62, None), None);
        assert_eq!(
            h.observe(0.63, None),
            Some(AlertTransition::Raise(AlertLevel::Warning))
        );
        assert_eq!(h.observe(0.58, Some(AlertLevel::Warning)), None);
    }

    #[test]
    fn single_spike_does_not_raise() {
        let mut h = tracker();
        assert_eq!(h.observe(0.7, None), None);
        assert_eq!(h.observe(0.4, None), None);
        assert_eq!(h.observe(0.7, None), None);
        // Streak was reset by the dip; needs a second consecutive sample.
        assert_eq!(
            h.observe(0.7, None),
            Some(AlertTransition::Raise(AlertLevel::Warning))
        );
    }

    #[test]
    fn clear_requires_confirmation_below_band() {
        let mut h = tracker();
        let open = Some(AlertLevel::Warning);
        assert_eq!(h.observe(0.45, open), None);
        assert_eq!(h.observe(0.55, open), None); // back in band, streak reset
        assert_eq!(h.observe(0.45, open), None);
        assert_eq!(h.observe(0.44, open), Some(AlertTransition::Clear));
    }

    #[test]
    fn critical_downgrades_to_warning_inside_band() {
        let mut h = tracker();
        let open = Some(AlertLevel::Critical);
        assert_eq!(h.observe(0.7, open), None);
        assert_eq!(
            h.observe(0.7, open),
            Some(AlertTransition::Downgrade(AlertLevel::Warning))
        );
    }

    #[test]
    fn critical_clears_entirely_below_warning_band() {
        let mut h = tracker();
        let open = Some(AlertLevel::Critical);
        assert_eq!(h.observe(0.3, open), None);
        assert_eq!(h.observe(0.3, open), Some(AlertTransition::Clear));
    }

    #[test]
    fn warning_escalates_to_critical() {
        let mut h = tracker();
        let open = Some(AlertLevel::Warning);
        assert_eq!(h.observe(0.9, open), None);
        assert_eq!(
            h.observe(0.9, open),
            Some(AlertTransition::Raise(AlertLevel::Critical))
        );
    }

    #[test]
    fn reset_drops_pending_streak() {
        let mut h = tracker();
        assert_eq!(h.observe(0.9, None), None);
        h.reset();
        // Streak starts over after the reset.
        assert_eq!(h.observe(0.9, None), None);
        assert_eq!(
            h.observe(0.9, None),
            Some(AlertTransition::Raise(AlertLevel::Critical))
        );
    }

    #[test]
    fn candidate_change_resets_streak() {
        let mut h = tracker();
        // One cycle towards Critical, then scores only justify Warning.
        assert_eq!(h.observe(0.9, None), None);
        assert_eq!(h.observe(0.65, None), None);
        assert_eq!(
            h.observe(0.65, None),
            Some(AlertTransition::Raise(AlertLevel::Warning))
        );
    }

    #[test]
    fn lifecycle_transitions() {
        let event = UpgradeEvent::new(EventId::from("evt"), "ethereum");
        let mut lifecycle = EventLifecycle::new(event, 8);
        assert_eq!(lifecycle.status(), EventStatus::Pending);
        lifecycle.activate().unwrap();
        lifecycle.activate().unwrap(); // idempotent
        assert_eq!(lifecycle.status(), EventStatus::Active);
        lifecycle.resolve().unwrap();
        assert_eq!(lifecycle.status(), EventStatus::Resolved);
        assert!(matches!(
            lifecycle.expire(),
            Err(EngineError::EventTerminated(_))
        ));
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        use crate::types::RiskCategory;
        use std::collections::{BTreeMap, BTreeSet};

        let event = UpgradeEvent::new(EventId::from("evt"), "ethereum");
        let mut lifecycle = EventLifecycle::new(event, 4);
        let mut now = Utc::now();
        for cycle in 1..=6 {
            now += chrono::Duration::seconds(1);
            lifecycle
                .record_snapshot(RiskSnapshot {
                    event_id: EventId::from("evt"),
                    cycle,
                    computed_at: now,
                    composite_score: 0.1,
                    category: RiskCategory::Low,
                    contributing: BTreeSet::new(),
                    staleness: BTreeMap::new(),
                    carried_forward: false,
                })
                .unwrap();
        }
        assert_eq!(lifecycle.latest_snapshot().unwrap().cycle, 6);
        assert_eq!(lifecycle.next_cycle(), 7);

        // Wrong cycle is an invariant violation.
        let bad = RiskSnapshot {
            event_id: EventId::from("evt"),
            cycle: 6,
            computed_at: now,
            composite_score: 0.1,
            category: RiskCategory::Low,
            contributing: BTreeSet::new(),
            staleness: BTreeMap::new(),
            carried_forward: false,
        };
        assert!(matches!(
            lifecycle.record_snapshot(bad),
            Err(EngineError::Invariant(_))
        ));
    }
}
