//! Core data model shared across the engine.
//!
//! Everything here is plain data: signals as produced by adapters, the
//! monitored upgrade event, the scoring output, and alert records. Mutation
//! and lifecycle logic live in the `engine` module.

mod alert;
mod event;
mod signal;
mod snapshot;

pub use alert::*;
pub use event::*;
pub use signal::*;
pub use snapshot::*;
