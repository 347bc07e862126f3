//! Per-event aggregation pipeline.
//!
//! Each tracked event gets exactly one pipeline task, which owns that
//! event's lifecycle state machine, score history, and alert evaluator.
//! Ownership by a single task is the concurrency story: there is never more
//! than one in-flight recompute per event, and recompute for event A never
//! waits on event B. The task wakes on the debounced change subscription,
//! recomputes, forwards writes and notices to the worker channels, and
//! reschedules its inactivity timer. Persistence and dispatch happen on
//! their own workers so a slow sink never delays scoring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::types::{EventStatus, GovernanceState, SourceKind, UpgradeEvent};

use super::bus::{BusSubscription, SignalBus};
use super::config::EngineConfig;
use super::dispatch::AlertNotice;
use super::evaluator::AlertEvaluator;
use super::persist::StoreWrite;
use super::scorer;
use super::state::EventLifecycle;

/// Out-of-band instructions for a running pipeline.
#[derive(Debug)]
pub(crate) enum PipelineCommand {
    /// Confirm the upgrade as executed and wind the event down.
    Resolve,
}

/// Engine-side handle to one pipeline task.
pub(crate) struct PipelineHandle {
    pub(crate) commands: mpsc::UnboundedSender<PipelineCommand>,
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) struct Pipeline {
    config: Arc<EngineConfig>,
    bus: Arc<SignalBus>,
    lifecycle: EventLifecycle,
    evaluator: AlertEvaluator,
    store_tx: mpsc::UnboundedSender<StoreWrite>,
    dispatch_tx: mpsc::UnboundedSender<AlertNotice>,
    terminated: Arc<AtomicBool>,
}

impl Pipeline {
    /// `subscription` must be created before any signal for the event can be
    /// accepted, otherwise arrivals between registration and the task's
    /// first poll would be lost.
    pub(crate) fn spawn(
        event: UpgradeEvent,
        subscription: BusSubscription,
        config: Arc<EngineConfig>,
        bus: Arc<SignalBus>,
        store_tx: mpsc::UnboundedSender<StoreWrite>,
        dispatch_tx: mpsc::UnboundedSender<AlertNotice>,
        shutdown: watch::Receiver<bool>,
    ) -> PipelineHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let pipeline = Pipeline {
            lifecycle: EventLifecycle::new(event, config.history_cap),
            evaluator: AlertEvaluator::new(config.alert.clone()),
            terminated: terminated.clone(),
            config,
            bus,
            store_tx,
            dispatch_tx,
        };

        let task = tokio::spawn(pipeline.run(subscription, command_rx, shutdown));

        PipelineHandle {
            commands: command_tx,
            terminated,
            task,
        }
    }

    async fn run(
        mut self,
        mut subscription: BusSubscription,
        mut commands: mpsc::UnboundedReceiver<PipelineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let event_id = self.lifecycle.event().event_id.clone();
        debug!(event_id = %event_id, "pipeline started");

        loop {
            // Fresh window every wake: any activity defers expiry.
            let expiry = tokio::time::sleep(self.config.inactivity_expiry());

            tokio::select! {
                changed = subscription.changed() => {
                    if !changed {
                        debug!(event_id = %event_id, "bus slot gone, pipeline exiting");
                        return;
                    }
                    if self.recompute() {
                        // Governance reported the upgrade executed.
                        self.finish(EventStatus::Resolved);
                        break;
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(PipelineCommand::Resolve) => {
                            self.finish(EventStatus::Resolved);
                            break;
                        }
                        None => break,
                    }
                }
                _ = expiry => {
                    info!(event_id = %event_id, "no accepted signal within the inactivity window");
                    self.finish(EventStatus::Expired);
                    break;
                }
                _ = shutdown.changed() => {
                    debug!(event_id = %event_id, "pipeline shutting down");
                    return;
                }
            }
        }

        // Terminal: keep the slot queryable through the retention grace,
        // then evict it (which also ends any lingering subscribers).
        let bus = self.bus.clone();
        let grace = self.config.retention_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            bus.evict(&event_id);
        });
    }

    /// One recompute cycle. Returns true when the governance signal says the
    /// upgrade has executed and the event should resolve.
    fn recompute(&mut self) -> bool {
        let event_id = self.lifecycle.event().event_id.clone();
        if self.lifecycle.status() == EventStatus::Pending {
            if self.lifecycle.activate().is_err() {
                return false;
            }
        }

        let Some(set) = self.bus.snapshot(&event_id) else {
            return false;
        };

        let now = self.lifecycle.monotonic_now(Utc::now());
        let cycle = self.lifecycle.next_cycle();
        let snapshot = scorer::compute_snapshot(
            &event_id,
            &set,
            self.lifecycle.latest_snapshot(),
            cycle,
            now,
            &self.config,
        );

        debug!(
            event_id = %event_id,
            cycle,
            score = snapshot.composite_score,
            category = snapshot.category.as_str(),
            degraded = snapshot.is_degraded(),
            "recomputed risk snapshot"
        );

        if let Err(err) = self.lifecycle.record_snapshot(snapshot.clone()) {
            error!(event_id = %event_id, error = %err, "snapshot rejected, aborting cycle");
            return false;
        }

        if self.store_tx.send(StoreWrite::Snapshot(snapshot.clone())).is_err() {
            debug!(event_id = %event_id, "store writer gone, snapshot not persisted");
        }

        if let Some(decision) = self.evaluator.evaluate(&snapshot) {
            info!(
                event_id = %event_id,
                transition = decision.transition.as_str(),
                level = decision.record.level.as_str(),
                score = snapshot.composite_score,
                "alert transition"
            );
            if let Some(replaced) = decision.replaced {
                // The alert this transition displaced closes now and gets
                // its own persisted row.
                let _ = self.store_tx.send(StoreWrite::Alert(replaced));
            }
            let _ = self.store_tx.send(StoreWrite::Alert(decision.record.clone()));
            let _ = self.dispatch_tx.send(AlertNotice {
                event_id: event_id.clone(),
                transition: decision.transition,
                record: decision.record,
                score: snapshot.composite_score,
                cycle: snapshot.cycle,
            });
        }

        set.get(SourceKind::Governance)
            .and_then(|signal| signal.governance_state())
            == Some(GovernanceState::Executed)
    }

    /// Move to a terminal status and close out any open alert.
    fn finish(&mut self, status: EventStatus) {
        let result = match status {
            EventStatus::Resolved => self.lifecycle.resolve(),
            EventStatus::Expired => self.lifecycle.expire(),
            _ => return,
        };
        if result.is_err() {
            return;
        }
        self.terminated.store(true, Ordering::SeqCst);
        // Close the bus too: the handle may be pruned before eviction, and
        // the slot must not keep taking signals meanwhile.
        self.bus.mark_terminal(&self.lifecycle.event().event_id);

        if let Some(latest) = self.lifecycle.latest_snapshot().cloned() {
            if let Some(decision) = self.evaluator.close_open(&latest) {
                info!(
                    event_id = %latest.event_id,
                    "alert cleared on terminal event"
                );
                let _ = self.store_tx.send(StoreWrite::Alert(decision.record.clone()));
                let _ = self.dispatch_tx.send(AlertNotice {
                    event_id: latest.event_id.clone(),
                    transition: decision.transition,
                    record: decision.record,
                    score: latest.composite_score,
                    cycle: latest.cycle,
                });
            }
        }
    }

    #[cfg(test)]
    fn for_test(
        event: UpgradeEvent,
        config: Arc<EngineConfig>,
        bus: Arc<SignalBus>,
        store_tx: mpsc::UnboundedSender<StoreWrite>,
        dispatch_tx: mpsc::UnboundedSender<AlertNotice>,
    ) -> Self {
        Pipeline {
            lifecycle: EventLifecycle::new(event, config.history_cap),
            evaluator: AlertEvaluator::new(config.alert.clone()),
            terminated: Arc::new(AtomicBool::new(false)),
            config,
            bus,
            store_tx,
            dispatch_tx,
        }
    }
}
