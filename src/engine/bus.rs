//! Per-event latest-value signal store with change notifications.
//!
//! The bus is one of the two pieces of shared mutable state in the engine
//! (the other being each pipeline's own state machine). Mutations are
//! serialized per event slot: the outer map lock is held only for lookup and
//! registration, so concurrent arrivals for different events proceed
//! independently while arrivals for the same event are strictly ordered by
//! acceptance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::errors::{EngineError, Result};
use crate::types::{EventId, Signal, SignalSet};

use super::normalize;

struct SlotState {
    signals: SignalSet,
    last_accepted: Option<DateTime<Utc>>,
}

struct Slot {
    state: Mutex<SlotState>,
    /// Change counter; bumped on every accepted signal. `watch` semantics
    /// give natural coalescing: a slow subscriber sees one pending change
    /// no matter how many arrivals it missed.
    changes: watch::Sender<u64>,
    /// Set when the event reaches a terminal status. The slot stays
    /// queryable through the retention grace but stops accepting signals.
    terminal: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(SlotState {
                signals: SignalSet::new(),
                last_accepted: None,
            }),
            changes,
            terminal: AtomicBool::new(false),
        }
    }
}

/// Thread-safe latest-signal store, one slot per tracked event.
pub struct SignalBus {
    slots: RwLock<HashMap<EventId, Arc<Slot>>>,
    debounce: Duration,
}

impl SignalBus {
    pub fn new(debounce: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            debounce,
        }
    }

    /// Create the slot for an event. Idempotent.
    pub fn register(&self, event_id: &EventId) {
        let mut slots = self.slots.write().expect("bus lock poisoned");
        slots.entry(event_id.clone()).or_insert_with(|| Arc::new(Slot::new()));
    }

    pub fn is_registered(&self, event_id: &EventId) -> bool {
        self.slots
            .read()
            .expect("bus lock poisoned")
            .contains_key(event_id)
    }

    fn slot(&self, event_id: &EventId) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .expect("bus lock poisoned")
            .get(event_id)
            .cloned()
    }

    /// Ingest one signal.
    ///
    /// Returns `Ok(true)` if the signal set changed, `Ok(false)` for an
    /// out-of-order or duplicate sequence number (dropped per the signal-set
    /// invariant). Domain violations are [`EngineError::InvalidSignal`];
    /// unknown events are [`EngineError::UnknownEvent`] so the caller can
    /// decide whether the source is allowed to create the event.
    pub fn ingest(&self, signal: Signal) -> Result<bool> {
        if let Err(reason) = normalize::validate_raw(signal.source, signal.raw_value, signal.confidence)
        {
            return Err(EngineError::InvalidSignal {
                event_id: signal.event_id,
                source_kind: signal.source.as_str(),
                reason,
            });
        }

        let slot = self
            .slot(&signal.event_id)
            .ok_or_else(|| EngineError::UnknownEvent(signal.event_id.clone()))?;

        if slot.terminal.load(Ordering::SeqCst) {
            return Err(EngineError::EventTerminated(signal.event_id));
        }

        let accepted = {
            let mut state = slot.state.lock().expect("slot lock poisoned");
            let stored_seq = state.signals.get(signal.source).map(|s| s.sequence_no);
            match stored_seq {
                Some(prev) if signal.sequence_no <= prev => {
                    trace!(
                        event_id = %signal.event_id,
                        source = signal.source.as_str(),
                        seq = signal.sequence_no,
                        stored_seq = prev,
                        "dropping out-of-order signal"
                    );
                    false
                }
                _ => {
                    state.last_accepted = Some(Utc::now());
                    state.signals.insert(signal);
                    true
                }
            }
        };

        if accepted {
            slot.changes.send_modify(|n| *n += 1);
        }
        Ok(accepted)
    }

    /// Consistent copy-on-read view of an event's signal set.
    pub fn snapshot(&self, event_id: &EventId) -> Option<SignalSet> {
        let slot = self.slot(event_id)?;
        let state = slot.state.lock().expect("slot lock poisoned");
        Some(state.signals.clone())
    }

    /// When the event last accepted any signal.
    pub fn last_accepted(&self, event_id: &EventId) -> Option<DateTime<Utc>> {
        let slot = self.slot(event_id)?;
        let state = slot.state.lock().expect("slot lock poisoned");
        state.last_accepted
    }

    /// Debounced change subscription for one event.
    pub fn subscribe(&self, event_id: &EventId) -> Option<BusSubscription> {
        let slot = self.slot(event_id)?;
        Some(BusSubscription {
            rx: slot.changes.subscribe(),
            debounce: self.debounce,
        })
    }

    /// Stop accepting signals for an event that reached a terminal status.
    /// The slot remains readable until [`SignalBus::evict`].
    pub fn mark_terminal(&self, event_id: &EventId) {
        if let Some(slot) = self.slot(event_id) {
            slot.terminal.store(true, Ordering::SeqCst);
        }
    }

    /// Drop an event's slot (terminal state, after the retention grace).
    pub fn evict(&self, event_id: &EventId) {
        let removed = self
            .slots
            .write()
            .expect("bus lock poisoned")
            .remove(event_id);
        if removed.is_some() {
            debug!(event_id = %event_id, "evicted signal bus slot");
        }
    }

    /// Number of tracked events.
    pub fn tracked_events(&self) -> usize {
        self.slots.read().expect("bus lock poisoned").len()
    }
}

/// Debounced view of one event's change stream.
///
/// Bursts of near-simultaneous arrivals collapse into one wake-up: after the
/// first change, the subscription waits out the debounce window and swallows
/// everything that arrived meanwhile. This is also the engine's backpressure
/// valve: excess notifications collapse instead of queueing.
pub struct BusSubscription {
    rx: watch::Receiver<u64>,
    debounce: Duration,
}

impl BusSubscription {
    /// Wait for the next coalesced change. Returns `false` once the slot is
    /// evicted (sender dropped).
    pub async fn changed(&mut self) -> bool {
        if self.rx.changed().await.is_err() {
            return false;
        }
        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        // Mark everything that arrived during the window as seen.
        self.rx.borrow_and_update();
        true
    }
}
