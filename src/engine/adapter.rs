//! Signal adapters: the uniform interface over external signal producers.
//!
//! Each producer (volatility model, sentiment model, governance feed,
//! market/technical feed) sits behind [`SignalSource`]. A model that cannot
//! produce a value reports confidence 0; that is a reading, not an error.
//! A genuine fetch failure is a [`SourceError`], retried with backoff before
//! the source is marked absent for the cycle. Runners push into the bus on
//! their own cadence and never block the aggregation path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{EngineError, SourceError};
use crate::types::{EventId, Signal, SourceKind};

use super::retry::retry_with_backoff;
use super::RiskEngine;

/// One raw observation from a producer, before it becomes a [`Signal`].
#[derive(Debug, Clone)]
pub struct SourceReading {
    pub raw_value: f64,
    /// Producer confidence in [0, 1]; 0 = "no usable value this cycle".
    pub confidence: f64,
    pub produced_at: DateTime<Utc>,
}

impl SourceReading {
    pub fn new(raw_value: f64, confidence: f64) -> Self {
        Self {
            raw_value,
            confidence,
            produced_at: Utc::now(),
        }
    }

    /// Reading for a producer that answered but has nothing usable
    /// (e.g. insufficient history for the model).
    pub fn unusable() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Capability interface for one signal producer, tagged with a fixed source
/// kind.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// The source kind every signal from this producer carries.
    fn kind(&self) -> SourceKind;

    /// Fetch the current reading for one event.
    async fn fetch(&self, event_id: &EventId) -> Result<SourceReading, SourceError>;
}

/// Drives one [`SignalSource`] for one event on a fixed cadence.
///
/// Transient fetch failures retry with exponential backoff (bounded by the
/// engine retry policy); after exhaustion the source contributes nothing
/// this cycle and the runner moves on to the next tick.
pub struct SourceRunner {
    source: Arc<dyn SignalSource>,
    cadence: Duration,
    sequence: AtomicU64,
}

impl SourceRunner {
    pub fn new(source: Arc<dyn SignalSource>, cadence: Duration) -> Self {
        Self {
            source,
            cadence,
            sequence: AtomicU64::new(0),
        }
    }

    /// Spawn the polling task. Ends cooperatively on shutdown.
    pub(crate) fn spawn(
        self,
        engine: Arc<RiskEngine>,
        event_id: EventId,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let kind = self.source.kind();
            let mut ticks = tokio::time::interval(self.cadence);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        self.poll_once(&engine, &event_id).await;
                    }
                    _ = shutdown.changed() => {
                        debug!(event_id = %event_id, source = kind.as_str(), "source runner stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn poll_once(&self, engine: &RiskEngine, event_id: &EventId) {
        let kind = self.source.kind();
        let retry = engine.config().retry.clone();

        let reading = retry_with_backoff(
            &retry,
            kind.as_str(),
            |err: &SourceError| err.is_transient(),
            || self.source.fetch(event_id),
        )
        .await;

        let reading = match reading {
            Ok(reading) => reading,
            Err(err) => {
                // Absent for this cycle; the scorer degrades gracefully.
                warn!(
                    event_id = %event_id,
                    source = kind.as_str(),
                    error = %err,
                    "source absent for this cycle"
                );
                return;
            }
        };

        let signal = Signal {
            event_id: event_id.clone(),
            source: kind,
            raw_value: reading.raw_value,
            confidence: reading.confidence,
            produced_at: reading.produced_at,
            sequence_no: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };

        match engine.submit(signal) {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = %event_id, source = kind.as_str(), "signal dropped (out of order)");
            }
            Err(EngineError::InvalidSignal { reason, .. }) => {
                warn!(
                    event_id = %event_id,
                    source = kind.as_str(),
                    %reason,
                    "invalid signal dropped"
                );
            }
            Err(EngineError::UnknownEvent(_)) | Err(EngineError::EventTerminated(_)) => {
                debug!(
                    event_id = %event_id,
                    source = kind.as_str(),
                    "event no longer accepts signals"
                );
            }
            Err(err) => {
                warn!(event_id = %event_id, source = kind.as_str(), error = %err, "ingest failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        kind: SourceKind,
        calls: AtomicU64,
        fail_first: u64,
    }

    #[async_trait]
    impl SignalSource for CountingSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch(&self, _event_id: &EventId) -> Result<SourceReading, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(SourceError::Unavailable("connection refused".into()))
            } else {
                Ok(SourceReading::new(0.5, 0.9))
            }
        }
    }

    #[tokio::test]
    async fn unusable_reading_has_zero_confidence() {
        let reading = SourceReading::unusable();
        assert_eq!(reading.confidence, 0.0);
    }

    #[tokio::test]
    async fn source_error_transience() {
        assert!(SourceError::Unavailable("x".into()).is_transient());
        assert!(!SourceError::InvalidReading("x".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retries_transient_failures() {
        let source = CountingSource {
            kind: SourceKind::Technical,
            calls: AtomicU64::new(0),
            fail_first: 2,
        };
        let retry = crate::engine::config::RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let id = EventId::from("evt");
        let result = retry_with_backoff(
            &retry,
            "technical",
            |err: &SourceError| err.is_transient(),
            || source.fetch(&id),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }
}
