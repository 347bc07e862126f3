//! Source-specific normalization of raw signal values into bounded risk
//! contributions.
//!
//! Pure and side-effect-free: the same raw value always maps to the same
//! contribution, independent of timing.

use crate::types::{GovernanceState, SourceKind};

use super::config::NormalizerConfig;

/// Map a raw value into a risk contribution in [0, 1].
///
/// Assumes the raw value already passed [`validate_raw`]; out-of-range inputs
/// are clamped rather than rejected here so the function stays total.
pub fn contribution(source: SourceKind, raw: f64, config: &NormalizerConfig) -> f64 {
    match source {
        // Higher annualized volatility => higher risk, saturating at the
        // configured ceiling.
        SourceKind::Volatility => (raw / config.vol_ceiling).clamp(0.0, 1.0),
        // Sentiment is [-1, 1]; more negative => higher risk.
        SourceKind::Sentiment => ((1.0 - raw) / 2.0).clamp(0.0, 1.0),
        SourceKind::Governance => match GovernanceState::from_code(raw) {
            Some(state) => config.governance.contribution(state).clamp(0.0, 1.0),
            // Unknown codes are rejected at ingest; treat as medium if one
            // slips through.
            None => 0.5,
        },
        // Already pre-scaled by the adapter.
        SourceKind::Technical => raw.clamp(0.0, 1.0),
    }
}

/// Domain check applied at ingest. A value outside its documented range is
/// a failure, not a signal.
pub fn validate_raw(source: SourceKind, raw: f64, confidence: f64) -> Result<(), String> {
    if !raw.is_finite() {
        return Err(format!("raw value {raw} is not finite"));
    }
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }
    match source {
        SourceKind::Volatility => {
            if raw < 0.0 {
                return Err(format!("volatility {raw} is negative"));
            }
        }
        SourceKind::Sentiment => {
            if !(-1.0..=1.0).contains(&raw) {
                return Err(format!("sentiment {raw} outside [-1, 1]"));
            }
        }
        SourceKind::Governance => {
            if GovernanceState::from_code(raw).is_none() {
                return Err(format!("unknown governance state code {raw}"));
            }
        }
        SourceKind::Technical => {
            if !(0.0..=1.0).contains(&raw) {
                return Err(format!("technical indicator {raw} outside [0, 1]"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NormalizerConfig {
        NormalizerConfig::default()
    }

    #[test]
    fn volatility_scales_against_ceiling() {
        let cfg = config();
        assert_eq!(contribution(SourceKind::Volatility, 0.0, &cfg), 0.0);
        // 75% annualized against a 150% ceiling
        assert!((contribution(SourceKind::Volatility, 0.75, &cfg) - 0.5).abs() < 1e-12);
        // Above the ceiling saturates
        assert_eq!(contribution(SourceKind::Volatility, 2.0, &cfg), 1.0);
    }

    #[test]
    fn sentiment_maps_negative_to_high_risk() {
        let cfg = config();
        assert_eq!(contribution(SourceKind::Sentiment, 1.0, &cfg), 0.0);
        assert_eq!(contribution(SourceKind::Sentiment, 0.0, &cfg), 0.5);
        assert_eq!(contribution(SourceKind::Sentiment, -1.0, &cfg), 1.0);
    }

    #[test]
    fn governance_uses_contribution_table() {
        let cfg = config();
        let code = GovernanceState::Contested.code();
        assert_eq!(contribution(SourceKind::Governance, code, &cfg), 0.8);
        let code = GovernanceState::Passed.code();
        assert_eq!(contribution(SourceKind::Governance, code, &cfg), 0.2);
        let code = GovernanceState::Pending.code();
        assert_eq!(contribution(SourceKind::Governance, code, &cfg), 0.5);
    }

    #[test]
    fn technical_passes_through() {
        let cfg = config();
        assert_eq!(contribution(SourceKind::Technical, 0.37, &cfg), 0.37);
        assert_eq!(contribution(SourceKind::Technical, 1.5, &cfg), 1.0);
    }

    #[test]
    fn determinism() {
        let cfg = config();
        for _ in 0..3 {
            assert_eq!(
                contribution(SourceKind::Sentiment, -0.42, &cfg),
                contribution(SourceKind::Sentiment, -0.42, &cfg)
            );
        }
    }

    #[test]
    fn domain_validation() {
        assert!(validate_raw(SourceKind::Volatility, 0.8, 1.0).is_ok());
        assert!(validate_raw(SourceKind::Volatility, -0.1, 1.0).is_err());
        assert!(validate_raw(SourceKind::Sentiment, -1.5, 1.0).is_err());
        assert!(validate_raw(SourceKind::Sentiment, f64::NAN, 1.0).is_err());
        assert!(validate_raw(SourceKind::Governance, 99.0, 1.0).is_err());
        assert!(validate_raw(SourceKind::Technical, 1.2, 1.0).is_err());
        assert!(validate_raw(SourceKind::Technical, 0.2, 1.1).is_err());
        assert!(validate_raw(SourceKind::Technical, 0.2, 0.0).is_ok());
    }
}
