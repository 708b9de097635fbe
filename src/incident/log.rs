//! Append-only incident log (JSON lines, one fsync per record)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::storage::{self, StorageError};
use crate::types::{EscalationRecord, StrategyAttempt, Trigger};

/// One durable state change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEntry {
    Opened {
        incident_id: String,
        process_id: String,
        opened_at: DateTime<Utc>,
        trigger: Trigger,
    },
    AttemptRecorded {
        incident_id: String,
        attempt: StrategyAttempt,
    },
    Resolved {
        incident_id: String,
        closed_at: DateTime<Utc>,
    },
    Escalated {
        record: EscalationRecord,
    },
    Acknowledged {
        incident_id: String,
        acknowledged_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<String>,
    },
}

impl LogEntry {
    pub fn incident_id(&self) -> &str {
        match self {
            LogEntry::Opened { incident_id, .. }
            | LogEntry::AttemptRecorded { incident_id, .. }
            | LogEntry::Resolved { incident_id, .. }
            | LogEntry::Acknowledged { incident_id, .. } => incident_id,
            LogEntry::Escalated { record } => &record.incident_id,
        }
    }
}

/// Writer handle on the incident log. Only the watchdog holds one.
#[derive(Debug)]
pub struct IncidentLog {
    path: PathBuf,
    file: File,
}

impl IncidentLog {
    /// Open for appending, creating the file if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = storage::open_append(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and fsync one entry. Returns only once the entry is durable.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        storage::append_json_line(&mut self.file, &self.path, entry)
    }

    /// Read every decodable entry in order. Undecodable lines are skipped
    /// with a warning.
    pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>, StorageError> {
        let (entries, skipped) = storage::read_json_lines::<LogEntry>(path)?;
        for line in skipped {
            warn!(path = %path.display(), line, "Skipping undecodable incident log line");
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttemptOutcome;
    use tempfile::tempdir;

    #[test]
    fn test_entry_wire_format() {
        let entry = LogEntry::Resolved {
            incident_id: "INC-1".into(),
            closed_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.starts_with(r#"{"event":"resolved""#), "{json}");
    }

    #[test]
    fn test_append_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("incidents.jsonl");
        let mut log = IncidentLog::open(&path).unwrap();
        let now = Utc::now();

        log.append(&LogEntry::Opened {
            incident_id: "INC-1".into(),
            process_id: "launcher".into(),
            opened_at: now,
            trigger: Trigger::StaleHeartbeat,
        })
        .unwrap();
        log.append(&LogEntry::AttemptRecorded {
            incident_id: "INC-1".into(),
            attempt: StrategyAttempt {
                strategy_name: "quick_restart".into(),
                started_at: now,
                timeout_seconds: 30,
                outcome: AttemptOutcome::Timeout,
                duration_ms: 30_000,
                error: Some("timed out".into()),
            },
        })
        .unwrap();

        let entries = IncidentLog::read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.incident_id() == "INC-1"));
    }
}
