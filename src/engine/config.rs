//! Engine configuration.
//!
//! All numeric defaults here are tunable operating points, not invariants:
//! the 40/30/20/10 weighting and the alert thresholds ship as defaults and
//! are expected to be overridden per deployment via the TOML config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::types::{GovernanceState, SourceKind};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Base weight per source, before confidence scaling.
///
/// Must sum to 1. The scorer re-normalizes over surviving sources, so these
/// express relative importance when every source is present and confident.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceWeights {
    #[serde(default = "default_weight_volatility")]
    pub volatility: f64,
    #[serde(default = "default_weight_sentiment")]
    pub sentiment: f64,
    #[serde(default = "default_weight_governance")]
    pub governance: f64,
    #[serde(default = "default_weight_technical")]
    pub technical: f64,
}

fn default_weight_volatility() -> f64 {
    0.4
}
fn default_weight_sentiment() -> f64 {
    0.3
}
fn default_weight_governance() -> f64 {
    0.2
}
fn default_weight_technical() -> f64 {
    0.1
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            volatility: default_weight_volatility(),
            sentiment: default_weight_sentiment(),
            governance: default_weight_governance(),
            technical: default_weight_technical(),
        }
    }
}

impl SourceWeights {
    /// Base weight for a source kind.
    pub fn weight(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Volatility => self.volatility,
            SourceKind::Sentiment => self.sentiment,
            SourceKind::Governance => self.governance,
            SourceKind::Technical => self.technical,
        }
    }

    fn validate(&self) -> Result<()> {
        let weights = SourceKind::ALL.map(|k| self.weight(k));
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Config(
                "source weights must be finite and non-negative".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::Config(format!(
                "source weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Per-source freshness thresholds. Signals older than this are excluded
/// from scoring (but not deleted).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StalenessConfig {
    /// Volatility forecasts stay usable for this long (default: 1h).
    #[serde(default = "default_staleness_slow_secs")]
    pub volatility_secs: u64,
    /// Sentiment scores go stale quickly (default: 15min).
    #[serde(default = "default_staleness_fast_secs")]
    pub sentiment_secs: u64,
    /// Governance state (default: 15min).
    #[serde(default = "default_staleness_fast_secs")]
    pub governance_secs: u64,
    /// Technical indicators (default: 1h).
    #[serde(default = "default_staleness_slow_secs")]
    pub technical_secs: u64,
}

fn default_staleness_slow_secs() -> u64 {
    3600
}
fn default_staleness_fast_secs() -> u64 {
    900
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            volatility_secs: default_staleness_slow_secs(),
            sentiment_secs: default_staleness_fast_secs(),
            governance_secs: default_staleness_fast_secs(),
            technical_secs: default_staleness_slow_secs(),
        }
    }
}

impl StalenessConfig {
    /// Freshness threshold for a source kind.
    pub fn threshold(&self, kind: SourceKind) -> chrono::Duration {
        let secs = match kind {
            SourceKind::Volatility => self.volatility_secs,
            SourceKind::Sentiment => self.sentiment_secs,
            SourceKind::Governance => self.governance_secs,
            SourceKind::Technical => self.technical_secs,
        };
        chrono::Duration::seconds(secs as i64)
    }
}

/// Alert raise/clear thresholds with hysteresis bands.
///
/// Raising to a level requires the score at/above the raise threshold for
/// `confirm_cycles` consecutive snapshots; clearing/downgrading requires it
/// below the clear threshold for the same number of cycles. The asymmetric
/// band suppresses flapping at a boundary value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertThresholds {
    #[serde(default = "default_warning_raise")]
    pub warning_raise: f64,
    #[serde(default = "default_warning_clear")]
    pub warning_clear: f64,
    #[serde(default = "default_critical_raise")]
    pub critical_raise: f64,
    #[serde(default = "default_critical_clear")]
    pub critical_clear: f64,
    /// Consecutive qualifying snapshots required for any transition.
    #[serde(default = "default_confirm_cycles")]
    pub confirm_cycles: u32,
}

fn default_warning_raise() -> f64 {
    0.6
}
fn default_warning_clear() -> f64 {
    0.5
}
fn default_critical_raise() -> f64 {
    0.85
}
fn default_critical_clear() -> f64 {
    0.75
}
fn default_confirm_cycles() -> u32 {
    2
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning_raise: default_warning_raise(),
            warning_clear: default_warning_clear(),
            critical_raise: default_critical_raise(),
            critical_clear: default_critical_clear(),
            confirm_cycles: default_confirm_cycles(),
        }
    }
}

impl AlertThresholds {
    fn validate(&self) -> Result<()> {
        let thresholds = [
            self.warning_raise,
            self.warning_clear,
            self.critical_raise,
            self.critical_clear,
        ];
        if thresholds.iter().any(|t| !t.is_finite() || !(0.0..=1.0).contains(t)) {
            return Err(EngineError::Config(
                "alert thresholds must be in [0, 1]".into(),
            ));
        }
        if self.warning_clear >= self.warning_raise {
            return Err(EngineError::Config(
                "warning_clear must be below warning_raise".into(),
            ));
        }
        if self.critical_clear >= self.critical_raise {
            return Err(EngineError::Config(
                "critical_clear must be below critical_raise".into(),
            ));
        }
        if self.warning_raise >= self.critical_raise {
            return Err(EngineError::Config(
                "warning_raise must be below critical_raise".into(),
            ));
        }
        if self.confirm_cycles == 0 {
            return Err(EngineError::Config(
                "confirm_cycles must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff policy shared by adapter fetches, store writes, and
/// alert dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Delay before the first retry (default: 1s).
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    /// Backoff multiplier (default: 2.0).
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
    /// Delay cap (default: 60s).
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    /// Total attempts including the first (default: 5).
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Jitter factor in [0, 1] (default: 0.1 = ±10%).
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_factor() -> f64 {
    2.0
}
fn default_retry_cap_ms() -> u64 {
    60_000
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_jitter() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
            cap_ms: default_retry_cap_ms(),
            max_attempts: default_retry_max_attempts(),
            jitter: default_retry_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err(EngineError::Config("retry factor must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(EngineError::Config("retry jitter must be in [0, 1]".into()));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Fixed contribution table for governance proposal states.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GovernanceTable {
    #[serde(default = "default_gov_pending")]
    pub pending: f64,
    #[serde(default = "default_gov_pending")]
    pub active: f64,
    #[serde(default = "default_gov_passed")]
    pub passed: f64,
    #[serde(default = "default_gov_contested")]
    pub contested: f64,
    #[serde(default = "default_gov_rejected")]
    pub rejected: f64,
    #[serde(default = "default_gov_executed")]
    pub executed: f64,
}

fn default_gov_pending() -> f64 {
    0.5
}
fn default_gov_passed() -> f64 {
    0.2
}
fn default_gov_contested() -> f64 {
    0.8
}
fn default_gov_rejected() -> f64 {
    0.4
}
fn default_gov_executed() -> f64 {
    0.1
}

impl Default for GovernanceTable {
    fn default() -> Self {
        Self {
            pending: default_gov_pending(),
            active: default_gov_pending(),
            passed: default_gov_passed(),
            contested: default_gov_contested(),
            rejected: default_gov_rejected(),
            executed: default_gov_executed(),
        }
    }
}

impl GovernanceTable {
    pub fn contribution(&self, state: GovernanceState) -> f64 {
        match state {
            GovernanceState::Pending => self.pending,
            GovernanceState::Active => self.active,
            GovernanceState::Passed => self.passed,
            GovernanceState::Contested => self.contested,
            GovernanceState::Rejected => self.rejected,
            GovernanceState::Executed => self.executed,
        }
    }
}

/// Source-specific normalization parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizerConfig {
    /// Annualized volatility mapped to contribution 1.0 (default: 1.5 = 150%).
    #[serde(default = "default_vol_ceiling")]
    pub vol_ceiling: f64,
    #[serde(default)]
    pub governance: GovernanceTable,
}

fn default_vol_ceiling() -> f64 {
    1.5
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            vol_ceiling: default_vol_ceiling(),
            governance: GovernanceTable::default(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub weights: SourceWeights,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub alert: AlertThresholds,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Debounce window for change-notification coalescing (default: 500ms).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Inactivity window before an Active event expires (default: 72h).
    #[serde(default = "default_inactivity_expiry_secs")]
    pub inactivity_expiry_secs: u64,
    /// Retention grace for audit reads after a terminal state (default: 24h).
    #[serde(default = "default_retention_grace_secs")]
    pub retention_grace_secs: u64,
    /// Maximum snapshots kept in per-event history (default: 256).
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_inactivity_expiry_secs() -> u64 {
    72 * 3600
}
fn default_retention_grace_secs() -> u64 {
    24 * 3600
}
fn default_history_cap() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: SourceWeights::default(),
            staleness: StalenessConfig::default(),
            alert: AlertThresholds::default(),
            normalizer: NormalizerConfig::default(),
            retry: RetryPolicy::default(),
            debounce_ms: default_debounce_ms(),
            inactivity_expiry_secs: default_inactivity_expiry_secs(),
            retention_grace_secs: default_retention_grace_secs(),
            history_cap: default_history_cap(),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn inactivity_expiry(&self) -> Duration {
        Duration::from_secs(self.inactivity_expiry_secs)
    }

    pub fn retention_grace(&self) -> Duration {
        Duration::from_secs(self.retention_grace_secs)
    }

    /// Validate the whole configuration. Call once at startup.
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.alert.validate()?;
        self.retry.validate()?;
        if !self.normalizer.vol_ceiling.is_finite() || self.normalizer.vol_ceiling <= 0.0 {
            return Err(EngineError::Config("vol_ceiling must be positive".into()));
        }
        if self.history_cap == 0 {
            return Err(EngineError::Config("history_cap must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_weights_match_spec_split() {
        let weights = SourceWeights::default();
        assert_eq!(weights.weight(SourceKind::Volatility), 0.4);
        assert_eq!(weights.weight(SourceKind::Sentiment), 0.3);
        assert_eq!(weights.weight(SourceKind::Governance), 0.2);
        assert_eq!(weights.weight(SourceKind::Technical), 0.1);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let config = EngineConfig {
            weights: SourceWeights {
                volatility: 0.5,
                ..SourceWeights::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_hysteresis_band() {
        let config = EngineConfig {
            alert: AlertThresholds {
                warning_clear: 0.7,
                ..AlertThresholds::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn staleness_thresholds_per_source() {
        let staleness = StalenessConfig::default();
        assert_eq!(
            staleness.threshold(SourceKind::Volatility),
            chrono::Duration::hours(1)
        );
        assert_eq!(
            staleness.threshold(SourceKind::Sentiment),
            chrono::Duration::minutes(15)
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.debounce_ms, config.debounce_ms);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let parsed: EngineConfig = toml::from_str("").unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.alert.confirm_cycles, 2);
    }
}
