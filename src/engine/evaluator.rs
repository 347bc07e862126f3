//! Alert transition evaluation.
//!
//! Owns the open-alert bookkeeping for one event: at most one open alert,
//! exactly-once transition emission per crossing, and idempotence on
//! re-evaluated snapshots.

use crate::types::{AlertLevel, AlertRecord, AlertTransition, RiskSnapshot};

use super::config::AlertThresholds;
use super::state::HysteresisTracker;

/// Outcome of evaluating one snapshot: the decided transition plus the
/// alert record to persist/dispatch.
#[derive(Debug, Clone)]
pub struct AlertDecision {
    pub transition: AlertTransition,
    pub record: AlertRecord,
    /// The previously open alert this decision closed out, if the
    /// transition replaced one. Needs persisting like any other closure.
    pub replaced: Option<AlertRecord>,
}

/// Per-event alert evaluator.
pub struct AlertEvaluator {
    hysteresis: HysteresisTracker,
    open: Option<AlertRecord>,
    last_cycle: u64,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            hysteresis: HysteresisTracker::new(thresholds),
            open: None,
            last_cycle: 0,
        }
    }

    /// The currently open alert, if any.
    pub fn open_alert(&self) -> Option<&AlertRecord> {
        self.open.as_ref()
    }

    /// Evaluate one snapshot.
    ///
    /// Fully-degraded cycles (carried-forward scores) are skipped; so are
    /// snapshots at or below the last evaluated cycle, which makes retried
    /// evaluation a no-op rather than a duplicate alert.
    pub fn evaluate(&mut self, snapshot: &RiskSnapshot) -> Option<AlertDecision> {
        if snapshot.cycle <= self.last_cycle {
            return None;
        }
        self.last_cycle = snapshot.cycle;

        if snapshot.carried_forward {
            // A degraded cycle breaks any confirmation streak: qualifying
            // scores on either side of it are not consecutive.
            self.hysteresis.reset();
            return None;
        }

        let open_level = self.open.as_ref().map(|a| a.level);
        let transition = self
            .hysteresis
            .observe(snapshot.composite_score, open_level)?;

        let (record, replaced) = self.apply(transition, snapshot);
        Some(AlertDecision {
            transition,
            record,
            replaced,
        })
    }

    /// Close the open alert unconditionally (event reached a terminal
    /// state). Bypasses hysteresis; returns the closing decision.
    pub fn close_open(&mut self, snapshot: &RiskSnapshot) -> Option<AlertDecision> {
        let mut record = self.open.take()?;
        record.cleared_at = Some(snapshot.computed_at);
        Some(AlertDecision {
            transition: AlertTransition::Clear,
            record,
            replaced: None,
        })
    }

    fn apply(
        &mut self,
        transition: AlertTransition,
        snapshot: &RiskSnapshot,
    ) -> (AlertRecord, Option<AlertRecord>) {
        match transition {
            AlertTransition::Raise(level) | AlertTransition::Downgrade(level) => {
                // Replacing an open alert closes it; the closed record goes
                // back to the caller for persistence.
                let replaced = self.open.take().map(|mut previous| {
                    previous.cleared_at = Some(snapshot.computed_at);
                    previous
                });
                let record = AlertRecord::open(
                    snapshot.event_id.clone(),
                    level,
                    snapshot.computed_at,
                    snapshot.cycle,
                );
                self.open = Some(record.clone());
                (record, replaced)
            }
            AlertTransition::Clear => {
                let mut record = self.open.take().unwrap_or_else(|| {
                    // Hysteresis only emits Clear while an alert is open.
                    AlertRecord::open(
                        snapshot.event_id.clone(),
                        AlertLevel::Info,
                        snapshot.computed_at,
                        snapshot.cycle,
                    )
                });
                record.cleared_at = Some(snapshot.computed_at);
                (record, None)
            }
        }
    }
}
