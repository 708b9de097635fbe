//! Watchdog's own event log, independent of the incident log.
//!
//! Best effort: a failed write is logged, never fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::storage;
use crate::types::WatchState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchdogEvent {
    Started { pid: u32, processes: Vec<String> },
    Stopped { reason: String },
    StateChanged { process_id: String, from: WatchState, to: WatchState },
    ProcessDown { process_id: String, pid: Option<u32>, detail: String },
    HeartbeatTimeout { process_id: String, detail: String },
    RecoveryAttempted { process_id: String, incident_id: String, strategy: String, outcome: String },
    /// An emergency bootstrap held its lock when recovery was due
    RecoveryDeferred { process_id: String, incident_id: String, bootstrap_pid: u32 },
    Escalated { process_id: String, incident_id: String, reason: String },
    Acknowledged { process_id: String, incident_id: String },
    GracefulShutdown { process_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WatchdogEvent,
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventLog {
    /// The file is opened on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: WatchdogEvent) {
        let record = EventRecord { at: Utc::now(), event };
        let Ok(mut guard) = self.file.lock() else {
            warn!("Event log lock poisoned, dropping event");
            return;
        };

        if guard.is_none() {
            match storage::open_append(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!(error = %e, "Event log unavailable");
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = storage::append_json_line(file, &self.path, &record) {
                warn!(error = %e, "Event log write failed");
                *guard = None;
            }
        }
    }

    pub fn read_all(path: &Path) -> Vec<EventRecord> {
        storage::read_json_lines(path).map(|(records, _)| records).unwrap_or_default()
    }
}
