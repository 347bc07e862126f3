//! Upgrade Sentinel
//!
//! Risk aggregation and alerting engine for blockchain protocol upgrade
//! events. Independent signal sources (realized volatility, social
//! sentiment, governance state, on-chain technical health) feed a per-event
//! pipeline that fuses them into a weighted composite risk score, tracks
//! each event's lifecycle, and drives hysteresis-filtered alert
//! transitions out to pluggable persistence and delivery boundaries.
//!
//! Entry points:
//! - [`engine::RiskEngine`]: build, register events, submit signals
//! - [`engine::SignalSource`]: implement to plug in a real producer
//! - [`engine::RiskStore`] / [`engine::AlertDispatcher`]: the outbound
//!   boundaries

#![deny(unreachable_pub)]

pub mod engine;
pub mod errors;
pub mod types;

pub use engine::RiskEngine;
pub use errors::{EngineError, Result, SourceError};
pub use types::{
    AlertLevel, AlertRecord, AlertTransition, EventId, EventStatus, GovernanceState,
    RiskCategory, RiskSnapshot, Signal, SignalSet, SourceKind, UpgradeEvent,
};
