//! Weighted composite scoring over a signal set.
//!
//! Graceful degradation is a correctness requirement here: any subset of
//! sources may be absent, unusable (confidence 0), or stale, and the scorer
//! still produces a snapshot. It never performs I/O and takes `now` as an
//! argument, so it is deterministic and unit-testable without timing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::types::{EventId, RiskCategory, RiskSnapshot, SignalSet};

use super::config::EngineConfig;
use super::normalize;

/// Score carried forward when nothing has ever been scored and no source
/// survives: medium risk, flagged fully degraded.
const DEGRADED_DEFAULT_SCORE: f64 = 0.5;

/// Compute the composite risk snapshot for one recompute cycle.
///
/// - Signals with confidence 0 are treated as absent.
/// - Signals older than their per-source staleness threshold are flagged
///   stale and excluded.
/// - Surviving weights are `base_weight * confidence`, re-normalized to the
///   surviving set.
/// - If nothing survives, the previous snapshot's score is carried forward
///   unchanged and the snapshot is marked `carried_forward`; callers must
///   not evaluate alert transitions on such cycles.
pub fn compute_snapshot(
    event_id: &EventId,
    set: &SignalSet,
    previous: Option<&RiskSnapshot>,
    cycle: u64,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> RiskSnapshot {
    let mut contributing = BTreeSet::new();
    let mut staleness = BTreeMap::new();
    let mut weighted_sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for signal in set.iter() {
        if !signal.is_usable() {
            // Unusable, treat as absent (not stale: the producer answered).
            continue;
        }
        let age = now.signed_duration_since(signal.produced_at);
        let stale = age > config.staleness.threshold(signal.source);
        staleness.insert(signal.source, stale);
        if stale {
            continue;
        }

        let contribution = normalize::contribution(signal.source, signal.raw_value, &config.normalizer);
        let effective_weight = config.weights.weight(signal.source) * signal.confidence;
        if effective_weight <= 0.0 {
            continue;
        }
        weighted_sum += effective_weight * contribution;
        weight_sum += effective_weight;
        contributing.insert(signal.source);
    }

    let (composite_score, carried_forward) = if weight_sum > 0.0 {
        ((weighted_sum / weight_sum).clamp(0.0, 1.0), false)
    } else {
        let carried = previous
            .map(|p| p.composite_score)
            .unwrap_or(DEGRADED_DEFAULT_SCORE);
        (carried, true)
    };

    RiskSnapshot {
        event_id: event_id.clone(),
        cycle,
        computed_at: now,
        composite_score,
        category: RiskCategory::from_score(composite_score),
        contributing,
        staleness,
        carried_forward,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::types::{Signal, SourceKind};

    use super::*;

    fn signal(
        source: SourceKind,
        raw: f64,
        confidence: f64,
        produced_at: DateTime<Utc>,
        seq: u64,
    ) -> Signal {
        Signal {
            event_id: EventId::from("evt"),
            source,
            raw_value: raw,
            confidence,
            produced_at,
            sequence_no: seq,
        }
    }

    fn compute(set: &SignalSet, prev: Option<&RiskSnapshot>, now: DateTime<Utc>) -> RiskSnapshot {
        compute_snapshot(
            &EventId::from("evt"),
            set,
            prev,
            prev.map(|p| p.cycle + 1).unwrap_or(1),
            now,
            &EngineConfig::default(),
        )
    }

    #[test]
    fn full_set_scores_within_bounds() {
        let now = Utc::now();
        let mut set = SignalSet::new();
        set.insert(signal(SourceKind::Volatility, 1.2, 0.9, now, 1));
        set.insert(signal(SourceKind::Sentiment, -0.8, 0.7, now, 1));
        set.insert(signal(SourceKind::Governance, 3.0, 1.0, now, 1)); // contested
        set.insert(signal(SourceKind::Technical, 0.6, 0.5, now, 1));

        let snap = compute(&set, None, now);
        assert!((0.0..=1.0).contains(&snap.composite_score));
        assert_eq!(snap.contributing.len(), 4);
        assert!(!snap.carried_forward);
    }

    #[test]
    fn missing_data_renormalizes_weights_exactly() {
        // Only volatility (contribution 0.9, conf 1.0) and governance
        // (contribution 0.5 = pending, conf 0.8). Expect
        // (0.4*1.0*0.9 + 0.2*0.8*0.5) / (0.4*1.0 + 0.2*0.8)
        let now = Utc::now();
        let mut set = SignalSet::new();
        // raw 1.35 / ceiling 1.5 => contribution 0.9
        set.insert(signal(SourceKind::Volatility, 1.35, 1.0, now, 1));
        set.insert(signal(SourceKind::Governance, 0.0, 0.8, now, 1)); // pending => 0.5

        let snap = compute(&set, None, now);
        let expected = (0.4 * 1.0 * 0.9 + 0.2 * 0.8 * 0.5) / (0.4 * 1.0 + 0.2 * 0.8);
        assert!(
            (snap.composite_score - expected).abs() < 1e-12,
            "got {}, expected {expected}",
            snap.composite_score
        );
        assert_eq!(snap.contributing.len(), 2);
    }

    #[test]
    fn zero_confidence_is_absent() {
        let now = Utc::now();
        let mut set = SignalSet::new();
        set.insert(signal(SourceKind::Volatility, 0.75, 0.0, now, 1));
        set.insert(signal(SourceKind::Technical, 0.3, 1.0, now, 1));

        let snap = compute(&set, None, now);
        assert!(!snap.contributing.contains(&SourceKind::Volatility));
        assert!((snap.composite_score - 0.3).abs() < 1e-12);
        // Absent is not stale
        assert!(!snap.staleness.contains_key(&SourceKind::Volatility));
    }

    #[test]
    fn stale_signals_are_flagged_and_excluded() {
        let now = Utc::now();
        let mut set = SignalSet::new();
        // Sentiment threshold is 15min; this one is 20min old.
        set.insert(signal(
            SourceKind::Sentiment,
            -1.0,
            1.0,
            now - Duration::minutes(20),
            1,
        ));
        set.insert(signal(SourceKind::Technical, 0.4, 1.0, now, 1));

        let snap = compute(&set, None, now);
        assert_eq!(snap.staleness.get(&SourceKind::Sentiment), Some(&true));
        assert!(!snap.contributing.contains(&SourceKind::Sentiment));
        assert!((snap.composite_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn carries_previous_score_when_nothing_survives() {
        let now = Utc::now();
        let mut set = SignalSet::new();
        set.insert(signal(SourceKind::Technical, 0.7, 1.0, now, 1));
        let first = compute(&set, None, now);
        assert!(!first.carried_forward);

        // Two hours later the signal is stale and nothing else arrived.
        let later = now + Duration::hours(2);
        let second = compute(&set, Some(&first), later);
        assert!(second.carried_forward);
        assert_eq!(second.composite_score, first.composite_score);
        assert!(second.contributing.is_empty());
        assert!(second.is_degraded());
    }

    #[test]
    fn degraded_default_without_history() {
        let now = Utc::now();
        let mut set = SignalSet::new();
        set.insert(signal(SourceKind::Volatility, 0.5, 0.0, now, 1));
        let snap = compute(&set, None, now);
        assert!(snap.carried_forward);
        assert_eq!(snap.composite_score, DEGRADED_DEFAULT_SCORE);
    }

    #[test]
    fn empty_set_is_degraded() {
        let now = Utc::now();
        let snap = compute(&SignalSet::new(), None, now);
        assert!(snap.carried_forward);
        assert!(snap.contributing.is_empty());
    }
}
