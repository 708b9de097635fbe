//! Shared data structures for process recovery
//!
//! This module defines the records that flow between the components:
//! - Heartbeat: liveness record written by the supervised process
//! - ProcessRecord / WatchState: the watchdog's view of one process
//! - Incident, StrategyAttempt, EscalationRecord: incident lifecycle
//! - ActionKind, CommandSpec: remediation building blocks

mod heartbeat;
mod incident;
mod process;
mod strategy;

pub use heartbeat::*;
pub use incident::*;
pub use process::*;
pub use strategy::*;
