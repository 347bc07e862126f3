use thiserror::Error;

use crate::types::EventId;

/// Failure outcomes from an external signal producer.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Transient fetch failure (network error, timeout). Retried with backoff.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The producer returned a value outside its documented domain.
    /// Not retried; the reading is dropped.
    #[error("invalid reading: {0}")]
    InvalidReading(String),
}

impl SourceError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Main engine error type.
///
/// No variant here is fatal to the engine process except
/// [`EngineError::Invariant`], which aborts the affected event's pipeline
/// (and only that pipeline).
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Signal value outside its documented domain. Logged and dropped.
    #[error("invalid signal for {event_id}/{source_kind}: {reason}")]
    InvalidSignal {
        event_id: EventId,
        source_kind: &'static str,
        reason: String,
    },

    /// Signal referenced an event the engine is not tracking.
    #[error("unknown event: {0}")]
    UnknownEvent(EventId),

    /// Operation targeted an event already in a terminal state.
    #[error("event {0} is terminal")]
    EventTerminated(EventId),

    /// Durable write failed after retries. Scoring continues.
    #[error("store write failed: {0}")]
    StoreWrite(String),

    /// Alert dispatch failed after retries. The alert remains recorded open.
    #[error("alert dispatch failed: {0}")]
    Dispatch(String),

    /// Configuration rejected by validation.
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant violated. Aborts the event's pipeline.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_signal_names_the_source_kind() {
        let err = EngineError::InvalidSignal {
            event_id: EventId::from("evt"),
            source_kind: "sentiment",
            reason: "outside [-1, 1]".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("evt/sentiment"));
        // None of the domain variants wraps an underlying error.
        assert!(std::error::Error::source(&err).is_none());
    }
}
