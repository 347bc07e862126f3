//! Simulated signal sources.
//!
//! Used by the `sentinel` binary's simulation mode and by tests that need
//! deterministic feeds. The random sources generate plausible readings in
//! each producer's raw domain; [`ScriptedSource`] replays a fixed sequence.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;

use crate::errors::SourceError;
use crate::types::{EventId, GovernanceState, SourceKind};

use super::adapter::{SignalSource, SourceReading};

/// Random-walk volatility ratio around a baseline.
pub struct SimVolatilitySource {
    baseline: Mutex<f64>,
}

impl SimVolatilitySource {
    pub fn new(baseline: f64) -> Self {
        Self {
            baseline: Mutex::new(baseline.max(0.0)),
        }
    }
}

#[async_trait]
impl SignalSource for SimVolatilitySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Volatility
    }

    async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
        let mut baseline = self.baseline.lock().expect("sim lock poisoned");
        let step: f64 = rand::thread_rng().gen_range(-0.1..0.1);
        *baseline = (*baseline + step).clamp(0.0, 3.0);
        Ok(SourceReading::new(*baseline, 0.9))
    }
}

/// Sentiment polarity drifting in [-1, 1], occasionally unusable to mimic
/// a model with too little fresh text.
pub struct SimSentimentSource {
    unusable_odds: f64,
}

impl SimSentimentSource {
    pub fn new(unusable_odds: f64) -> Self {
        Self {
            unusable_odds: unusable_odds.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl SignalSource for SimSentimentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sentiment
    }

    async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.unusable_odds) {
            return Ok(SourceReading::unusable());
        }
        let polarity: f64 = rng.gen_range(-1.0..1.0);
        let confidence: f64 = rng.gen_range(0.4..1.0);
        Ok(SourceReading::new(polarity, confidence))
    }
}

/// Governance feed walking a proposal through its lifecycle, one state per
/// `polls_per_state` fetches.
pub struct SimGovernanceSource {
    polls_per_state: u32,
    state: Mutex<(usize, u32)>,
}

const GOVERNANCE_PATH: [GovernanceState; 4] = [
    GovernanceState::Pending,
    GovernanceState::Active,
    GovernanceState::Passed,
    GovernanceState::Executed,
];

impl SimGovernanceSource {
    pub fn new(polls_per_state: u32) -> Self {
        Self {
            polls_per_state: polls_per_state.max(1),
            state: Mutex::new((0, 0)),
        }
    }
}

#[async_trait]
impl SignalSource for SimGovernanceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Governance
    }

    async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
        let mut state = self.state.lock().expect("sim lock poisoned");
        let (index, polls) = *state;
        let current = GOVERNANCE_PATH[index];
        let next_polls = polls + 1;
        if next_polls >= self.polls_per_state && index + 1 < GOVERNANCE_PATH.len() {
            *state = (index + 1, 0);
        } else {
            *state = (index, next_polls);
        }
        Ok(SourceReading::new(current.code(), 1.0))
    }
}

/// Technical on-chain health score, mildly noisy around a fixed level.
pub struct SimTechnicalSource {
    level: f64,
}

impl SimTechnicalSource {
    pub fn new(level: f64) -> Self {
        Self {
            level: level.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl SignalSource for SimTechnicalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Technical
    }

    async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
        let noise: f64 = rand::thread_rng().gen_range(-0.05..0.05);
        Ok(SourceReading::new((self.level + noise).clamp(0.0, 1.0), 0.95))
    }
}

/// Replays a fixed script of fetch outcomes, then repeats the last one.
pub struct ScriptedSource {
    kind: SourceKind,
    script: Mutex<VecDeque<Result<SourceReading, SourceError>>>,
    last: Mutex<Option<SourceReading>>,
}

impl ScriptedSource {
    pub fn new(
        kind: SourceKind,
        script: impl IntoIterator<Item = Result<SourceReading, SourceError>>,
    ) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SignalSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
        let next = self.script.lock().expect("sim lock poisoned").pop_front();
        match next {
            Some(Ok(reading)) => {
                *self.last.lock().expect("sim lock poisoned") = Some(reading.clone());
                Ok(reading)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last
                .lock()
                .expect("sim lock poisoned")
                .clone()
                .ok_or_else(|| SourceError::Unavailable("script exhausted".into())),
        }
    }
}
