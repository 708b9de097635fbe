//! Health Monitor
//!
//! Combines two independent signals per poll, the heartbeat file and the OS
//! process table, into a HEALTHY / SUSPECT / FAILED verdict.

mod health_monitor;
mod probe;

pub use health_monitor::{Evaluation, HealthMonitor, Observation, Verdict};
pub use probe::{DetectionError, Presence, ProcessProbe, ProcfsProbe};
