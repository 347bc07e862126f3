//! Persistence boundary.
//!
//! The engine emits snapshots and alert records for durable storage but does
//! not assume writes succeed synchronously: a writer task drains a channel
//! and retries failures with backoff, so a slow store never blocks scoring.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::errors::Result;
use crate::types::{AlertRecord, EventId, RiskSnapshot};

use super::config::RetryPolicy;
use super::retry::retry_with_backoff;

/// Durable storage boundary for scoring output.
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn record_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()>;
    async fn record_alert(&self, record: &AlertRecord) -> Result<()>;
}

/// A write handed to the store writer task.
#[derive(Debug, Clone)]
pub(crate) enum StoreWrite {
    Snapshot(RiskSnapshot),
    Alert(AlertRecord),
}

/// In-memory store for tests, the demo binary, and audit reads.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<Vec<RiskSnapshot>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots recorded for an event, in write order.
    pub fn snapshots_for(&self, event_id: &EventId) -> Vec<RiskSnapshot> {
        self.snapshots
            .read()
            .expect("store lock poisoned")
            .iter()
            .filter(|s| &s.event_id == event_id)
            .cloned()
            .collect()
    }

    /// All alert records for an event, in write order.
    pub fn alerts_for(&self, event_id: &EventId) -> Vec<AlertRecord> {
        self.alerts
            .read()
            .expect("store lock poisoned")
            .iter()
            .filter(|a| &a.event_id == event_id)
            .cloned()
            .collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().expect("store lock poisoned").len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().expect("store lock poisoned").len()
    }
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn record_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .expect("store lock poisoned")
            .push(snapshot.clone());
        Ok(())
    }

    async fn record_alert(&self, record: &AlertRecord) -> Result<()> {
        self.alerts
            .write()
            .expect("store lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// Spawn the store writer: drains the write channel, retrying each write
/// with backoff, logging (never propagating) exhausted failures.
pub(crate) fn spawn_store_writer(
    mut rx: mpsc::UnboundedReceiver<StoreWrite>,
    store: Arc<dyn RiskStore>,
    retry: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let result = retry_with_backoff(&retry, "store", |_| true, || async {
                match &write {
                    StoreWrite::Snapshot(snapshot) => store.record_snapshot(snapshot).await,
                    StoreWrite::Alert(record) => store.record_alert(record).await,
                }
            })
            .await;

            if let Err(err) = result {
                let event_id = match &write {
                    StoreWrite::Snapshot(s) => &s.event_id,
                    StoreWrite::Alert(a) => &a.event_id,
                };
                error!(
                    event_id = %event_id,
                    error = %err,
                    "store write exhausted retries; scoring continues"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use crate::errors::EngineError;
    use crate::types::{AlertLevel, RiskCategory};

    use super::*;

    fn snapshot(event: &str, cycle: u64) -> RiskSnapshot {
        RiskSnapshot {
            event_id: EventId::from(event),
            cycle,
            computed_at: Utc::now(),
            composite_score: 0.4,
            category: RiskCategory::Medium,
            contributing: BTreeSet::new(),
            staleness: BTreeMap::new(),
            carried_forward: false,
        }
    }

    #[tokio::test]
    async fn memory_store_filters_by_event() {
        let store = MemoryStore::new();
        store.record_snapshot(&snapshot("a", 1)).await.unwrap();
        store.record_snapshot(&snapshot("b", 1)).await.unwrap();
        store.record_snapshot(&snapshot("a", 2)).await.unwrap();
        store
            .record_alert(&AlertRecord::open(
                EventId::from("a"),
                AlertLevel::Warning,
                Utc::now(),
                2,
            ))
            .await
            .unwrap();

        assert_eq!(store.snapshots_for(&EventId::from("a")).len(), 2);
        assert_eq!(store.snapshots_for(&EventId::from("b")).len(), 1);
        assert_eq!(store.alerts_for(&EventId::from("a")).len(), 1);
        assert_eq!(store.alert_count(), 1);
    }

    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl RiskStore for FlakyStore {
        async fn record_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EngineError::StoreWrite("db unavailable".into()));
            }
            self.inner.record_snapshot(snapshot).await
        }

        async fn record_alert(&self, record: &AlertRecord) -> Result<()> {
            self.inner.record_alert(record).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writer_retries_failed_writes() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(2),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let writer = spawn_store_writer(rx, store.clone(), retry);

        tx.send(StoreWrite::Snapshot(snapshot("a", 1))).unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(store.inner.snapshot_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_gives_up_but_keeps_draining() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy {
            max_attempts: 2,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let writer = spawn_store_writer(rx, store.clone(), retry);

        tx.send(StoreWrite::Snapshot(snapshot("a", 1))).unwrap();
        tx.send(StoreWrite::Alert(AlertRecord::open(
            EventId::from("a"),
            AlertLevel::Warning,
            Utc::now(),
            1,
        )))
        .unwrap();
        drop(tx);
        writer.await.unwrap();

        // Snapshot failed permanently, but the alert (separate path) landed.
        assert_eq!(store.inner.snapshot_count(), 0);
        assert_eq!(store.inner.alert_count(), 1);
    }
}
