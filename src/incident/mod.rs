//! Incident Manager
//!
//! Incidents live in an append-only JSON-lines log on stable storage. The
//! watchdog is its only writer; the in-memory index is rebuilt by replay on
//! startup, and read-only tooling (`warden status`) replays it the same way.

mod log;
mod manager;

pub use log::{IncidentLog, LogEntry};
pub use manager::{IncidentError, IncidentIndex, IncidentManager, RecoveryStats};
