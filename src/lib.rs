//! Warden: Autonomous Process Recovery
//!
//! Keeps a long-running process alive without a human in the loop.
//!
//! ## Architecture
//!
//! - **Heartbeat Channel**: the supervised process writes a small JSON file;
//!   the watchdog only ever reads it
//! - **Health Monitor**: two-stage debounce over heartbeat age and process
//!   liveness (HEALTHY / SUSPECT / FAILED)
//! - **Incident Manager**: append-only JSON lines log, replayed into an
//!   in-memory index on startup
//! - **Recovery Agent**: ordered strategy table, hard timeouts, cooldown and
//!   restart cap
//! - **Escalation Gateway**: fan-out to log, file drop and webhook channels
//! - **Watchdog**: one supervisor task per process plus a control task
//! - **Emergency Bootstrap**: separate binary for when the watchdog itself
//!   cannot start

pub mod bootstrap;
pub mod config;
pub mod escalation;
pub mod heartbeat;
pub mod incident;
pub mod monitor;
pub mod recovery;
pub mod storage;
pub mod sys;
pub mod types;
pub mod watchdog;

pub use config::{ConfigError, ProcessConfig, WardenConfig};
pub use escalation::EscalationGateway;
pub use heartbeat::HeartbeatEmitter;
pub use incident::{IncidentError, IncidentIndex, IncidentManager};
pub use monitor::{HealthMonitor, ProcessProbe, ProcfsProbe, Verdict};
pub use recovery::{BuiltinAction, RecoveryAgent, StrategyAction, StrategyTable};
pub use watchdog::{ProcessSupervisor, Watchdog};
