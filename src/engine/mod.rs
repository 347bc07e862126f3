//! Risk aggregation engine.
//!
//! The engine fuses asynchronously arriving risk signals per upgrade event
//! into a composite score and drives alert transitions off it. The moving
//! parts:
//! - [`SignalBus`]: latest-value store with debounced change notifications
//! - one pipeline task per event: lifecycle, scoring, alert evaluation
//! - a store writer and a dispatch worker so persistence and delivery never
//!   block scoring
//! - [`SourceRunner`]s polling [`SignalSource`] producers on their own
//!   cadence
//!
//! [`RiskEngine`] is the facade that wires these together and owns the
//! shutdown signal.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod evaluator;
pub mod normalize;
pub mod persist;
mod pipeline;
pub mod retry;
pub mod scorer;
pub mod sim;
pub mod state;


use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::{EngineError, Result};
use crate::types::{EventId, Signal, SignalSet, UpgradeEvent};

pub use adapter::{SignalSource, SourceReading, SourceRunner};
pub use bus::{BusSubscription, SignalBus};
pub use config::{
    AlertThresholds, EngineConfig, GovernanceTable, NormalizerConfig, RetryPolicy,
    SourceWeights, StalenessConfig,
};
pub use dispatch::{AlertDispatcher, AlertNotice, LogDispatcher, WebhookDispatcher};
pub use evaluator::{AlertDecision, AlertEvaluator};
pub use persist::{MemoryStore, RiskStore};
pub use scorer::compute_snapshot;
pub use state::{EventLifecycle, HysteresisTracker};

use dispatch::spawn_dispatch_worker;
use persist::{spawn_store_writer, StoreWrite};
use pipeline::{Pipeline, PipelineCommand, PipelineHandle};

/// Top-level engine handle.
///
/// Cheap to share behind an [`Arc`]; every method is callable from any task.
pub struct RiskEngine {
    config: Arc<EngineConfig>,
    bus: Arc<SignalBus>,
    pipelines: RwLock<HashMap<EventId, PipelineHandle>>,
    store_tx: mpsc::UnboundedSender<StoreWrite>,
    dispatch_tx: mpsc::UnboundedSender<AlertNotice>,
    shutdown: watch::Sender<bool>,
    store_writer: JoinHandle<()>,
    dispatch_worker: JoinHandle<()>,
}

impl RiskEngine {
    /// Build the engine and start its worker tasks. Must run inside a tokio
    /// runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RiskStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let bus = Arc::new(SignalBus::new(config.debounce()));

        let (store_tx, store_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let store_writer = spawn_store_writer(store_rx, store, config.retry.clone());
        let dispatch_worker = spawn_dispatch_worker(dispatch_rx, dispatcher, config.retry.clone());

        Ok(Arc::new(Self {
            config,
            bus,
            pipelines: RwLock::new(HashMap::new()),
            store_tx,
            dispatch_tx,
            shutdown,
            store_writer,
            dispatch_worker,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start tracking an upgrade event: a bus slot plus a dedicated
    /// pipeline task. Idempotent for an already-tracked event.
    pub fn register_event(&self, event: UpgradeEvent) -> Result<()> {
        let mut pipelines = self.pipelines.write().expect("pipeline registry poisoned");
        if pipelines.contains_key(&event.event_id) {
            debug!(event_id = %event.event_id, "event already tracked");
            return Ok(());
        }

        let event_id = event.event_id.clone();
        self.bus.register(&event_id);
        // Subscribe before releasing the registry lock: signals can only be
        // accepted after it, so the pipeline's first poll sees them all.
        let subscription = self
            .bus
            .subscribe(&event_id)
            .ok_or_else(|| EngineError::Invariant(format!("no bus slot for {event_id}")))?;
        let handle = Pipeline::spawn(
            event,
            subscription,
            self.config.clone(),
            self.bus.clone(),
            self.store_tx.clone(),
            self.dispatch_tx.clone(),
            self.shutdown.subscribe(),
        );
        pipelines.insert(event_id.clone(), handle);
        info!(event_id = %event_id, tracked = pipelines.len(), "tracking upgrade event");
        Ok(())
    }

    /// Ingest one signal.
    ///
    /// A signal for an untracked event from a discovery-capable source
    /// (governance, technical) creates the event on the fly; from any other
    /// source it is rejected with [`EngineError::UnknownEvent`]. Signals for
    /// terminal events are rejected with [`EngineError::EventTerminated`].
    /// Returns `Ok(false)` for an out-of-order drop.
    pub fn submit(&self, signal: Signal) -> Result<bool> {
        {
            let pipelines = self.pipelines.read().expect("pipeline registry poisoned");
            match pipelines.get(&signal.event_id) {
                Some(handle) if handle.terminated.load(Ordering::SeqCst) => {
                    return Err(EngineError::EventTerminated(signal.event_id));
                }
                Some(_) => {}
                None => {
                    if !signal.source.discovers_events() {
                        return Err(EngineError::UnknownEvent(signal.event_id));
                    }
                }
            }
        }

        if !self.bus.is_registered(&signal.event_id) {
            // Discovery path: governance/technical feeds see proposals
            // before an operator registers them.
            info!(
                event_id = %signal.event_id,
                source = signal.source.as_str(),
                "discovered upgrade event from signal"
            );
            self.register_event(UpgradeEvent::discovered(signal.event_id.clone()))?;
        }

        self.bus.ingest(signal)
    }

    /// Explicitly resolve an event (operator confirmation that the upgrade
    /// executed).
    pub fn resolve(&self, event_id: &EventId) -> Result<()> {
        let pipelines = self.pipelines.read().expect("pipeline registry poisoned");
        let handle = pipelines
            .get(event_id)
            .ok_or_else(|| EngineError::UnknownEvent(event_id.clone()))?;
        if handle.terminated.load(Ordering::SeqCst) {
            return Err(EngineError::EventTerminated(event_id.clone()));
        }
        handle
            .commands
            .send(PipelineCommand::Resolve)
            .map_err(|_| EngineError::EventTerminated(event_id.clone()))
    }

    /// Attach a polling source to a tracked event.
    pub fn attach_source(
        self: &Arc<Self>,
        source: Arc<dyn SignalSource>,
        event_id: EventId,
        cadence: Duration,
    ) -> Result<JoinHandle<()>> {
        if !self.bus.is_registered(&event_id) {
            return Err(EngineError::UnknownEvent(event_id));
        }
        let runner = SourceRunner::new(source, cadence);
        Ok(runner.spawn(self.clone(), event_id, self.shutdown.subscribe()))
    }

    /// Current signal set for an event, if still tracked.
    pub fn signals(&self, event_id: &EventId) -> Option<SignalSet> {
        self.bus.snapshot(event_id)
    }

    pub fn tracked_events(&self) -> usize {
        self.bus.tracked_events()
    }

    /// Drop registry entries for pipelines that have finished.
    pub fn prune(&self) {
        let mut pipelines = self.pipelines.write().expect("pipeline registry poisoned");
        pipelines.retain(|_, handle| !handle.task.is_finished());
    }

    /// Signal every pipeline and source runner to stop. The store writer
    /// and dispatch worker drain their queues and exit once the engine is
    /// dropped.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);
    }

    /// Whether the background workers are still running.
    pub fn workers_alive(&self) -> bool {
        !self.store_writer.is_finished() && !self.dispatch_worker.is_finished()
    }
}
