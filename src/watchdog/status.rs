//! Status snapshot written each control tick and read by `warden status`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::incident::{IncidentIndex, RecoveryStats};
use crate::storage::{self, StorageError};
use crate::types::{Incident, ProcessRecord, WatchState};

/// `warden status` exit codes
pub const EXIT_HEALTHY: u8 = 0;
pub const EXIT_INCIDENT_OPEN: u8 = 1;
pub const EXIT_AWAITING_HUMAN: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessStatus {
    pub process_id: String,
    pub state: WatchState,
    pub last_verdict: Option<String>,
    pub detail: Option<String>,
    pub record: ProcessRecord,
    pub active_incident: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub watchdog_pid: u32,
    pub processes: Vec<ProcessStatus>,
}

impl StatusSnapshot {
    pub fn read(path: &Path) -> Result<Option<Self>, StorageError> {
        storage::read_json(path)
    }
}

/// Latest status per process, shared by the supervisor tasks
#[derive(Debug)]
pub struct StatusBoard {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ProcessStatus>>,
}

impl StatusBoard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entries: Mutex::new(BTreeMap::new()) }
    }

    pub fn update(&self, status: ProcessStatus) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(status.process_id.clone(), status);
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let processes = self
            .entries
            .lock()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        StatusSnapshot { generated_at: now, watchdog_pid: std::process::id(), processes }
    }

    pub fn write(&self, now: DateTime<Utc>) -> Result<(), StorageError> {
        storage::write_json_atomic(&self.path, &self.snapshot(now))
    }
}

/// Exit code from durable incident state: 2 if any escalation awaits a
/// human, 1 if any incident is open, else 0
pub fn exit_code(index: &IncidentIndex) -> u8 {
    if index.awaiting_acknowledgement().next().is_some() {
        EXIT_AWAITING_HUMAN
    } else if index.open_incidents().next().is_some() {
        EXIT_INCIDENT_OPEN
    } else {
        EXIT_HEALTHY
    }
}

/// Everything `warden status` prints, as text or JSON
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub watchdog_pid: Option<u32>,
    pub exit_code: u8,
    pub snapshot: Option<StatusSnapshot>,
    pub open_incidents: Vec<Incident>,
    pub stats: RecoveryStats,
}

impl StatusReport {
    pub fn build(index: &IncidentIndex, snapshot: Option<StatusSnapshot>, watchdog_pid: Option<u32>) -> Self {
        Self {
            watchdog_pid,
            exit_code: exit_code(index),
            snapshot,
            open_incidents: index.incidents().filter(|i| i.is_blocking()).cloned().collect(),
            stats: index.stats(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.watchdog_pid {
            Some(pid) => writeln!(f, "Watchdog: running (pid {pid})")?,
            None => writeln!(f, "Watchdog: not running")?,
        }
        if let Some(snapshot) = &self.snapshot {
            writeln!(f, "Snapshot: {}", snapshot.generated_at.to_rfc3339())?;
            for p in &snapshot.processes {
                writeln!(
                    f,
                    "  {:<20} {:<20} restarts={:<3} pid={}",
                    p.process_id,
                    p.state.to_string(),
                    p.record.restart_count,
                    p.record.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
                )?;
            }
        }

        if self.open_incidents.is_empty() {
            writeln!(f, "No open incidents")?;
        }
        for incident in &self.open_incidents {
            let marker = if incident.awaiting_acknowledgement() { "  ⚠ awaiting ack" } else { "" };
            writeln!(
                f,
                "  {} {} {} trigger={} attempts={}{}",
                incident.incident_id,
                incident.process_id,
                incident.status,
                incident.trigger,
                incident.strategies_tried.len(),
                marker,
            )?;
        }
        writeln!(f, "Stats: {}", self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::LogEntry;
    use crate::types::{EscalationRecord, Trigger};
    use tempfile::tempdir;

    fn opened(id: &str, process: &str) -> LogEntry {
        LogEntry::Opened {
            incident_id: id.into(),
            process_id: process.into(),
            opened_at: Utc::now(),
            trigger: Trigger::StaleHeartbeat,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&IncidentIndex::default()), EXIT_HEALTHY);

        let open = IncidentIndex::from_entries(vec![opened("INC-a-1", "a")]);
        assert_eq!(exit_code(&open), EXIT_INCIDENT_OPEN);

        let escalated = IncidentIndex::from_entries(vec![
            opened("INC-a-1", "a"),
            opened("INC-b-2", "b"),
            LogEntry::Escalated {
                record: EscalationRecord {
                    incident_id: "INC-b-2".into(),
                    process_id: "b".into(),
                    escalated_at: Utc::now(),
                    reason: "exhausted".into(),
                    notified_channels: vec![],
                    acknowledged_at: None,
                    acknowledged_by: None,
                },
            },
        ]);
        assert_eq!(exit_code(&escalated), EXIT_AWAITING_HUMAN);
    }

    #[test]
    fn test_board_writes_snapshot() {
        let dir = tempdir().unwrap();
        let board = StatusBoard::new(dir.path().join("status.json"));
        board.update(ProcessStatus {
            process_id: "launcher".into(),
            state: WatchState::Cooldown,
            last_verdict: Some("FAILED".into()),
            detail: None,
            record: ProcessRecord::new("launcher"),
            active_incident: Some("INC-1".into()),
        });
        board.write(Utc::now()).unwrap();

        let snap = StatusSnapshot::read(&dir.path().join("status.json")).unwrap().unwrap();
        assert_eq!(snap.processes.len(), 1);
        assert_eq!(snap.processes[0].state, WatchState::Cooldown);
    }

    #[test]
    fn test_report_carries_recovery_stats() {
        let index = IncidentIndex::from_entries(vec![opened("INC-a-1", "a"), opened("INC-b-2", "b")]);
        let report = StatusReport::build(&index, None, Some(4242));

        assert_eq!(report.exit_code, EXIT_INCIDENT_OPEN);
        assert_eq!(report.stats.total_incidents, 2);
        assert_eq!(report.stats.open_incidents, 2);

        let doc = serde_json::to_value(&report).unwrap();
        assert_eq!(doc["stats"]["total_incidents"], 2);
        assert_eq!(doc["stats"]["total_recoveries"], 0);
        assert_eq!(doc["open_incidents"].as_array().unwrap().len(), 2);

        let text = report.to_string();
        assert!(text.starts_with("Watchdog: running (pid 4242)"));
        assert!(text.contains("Stats: incidents 2"), "{text}");
    }
}
