//! Incident lifecycle: validation, durable append, then in-memory update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::log::{IncidentLog, LogEntry};
use crate::storage::StorageError;
use crate::types::{AttemptOutcome, EscalationRecord, Incident, IncidentStatus, StrategyAttempt, Trigger};

/// Incident state errors.
///
/// Everything except `Persistence` is an invalid request that callers log
/// and ignore. `Persistence` is fatal for the watchdog.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("process '{process_id}' already has open incident {incident_id}")]
    AlreadyOpen { process_id: String, incident_id: String },
    #[error("process '{process_id}' is frozen until escalation {incident_id} is acknowledged")]
    AwaitingAcknowledgement { process_id: String, incident_id: String },
    #[error("incident {0} not found")]
    NotFound(String),
    #[error("incident {0} is closed")]
    Closed(String),
    #[error("incident {0} is escalated; automated attempts are frozen")]
    Frozen(String),
    #[error("incident {incident_id}: {reason}")]
    InvalidTransition { incident_id: String, reason: String },
    #[error("incident log write failed: {0}")]
    Persistence(#[from] StorageError),
}

impl IncidentError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, IncidentError::Persistence(_))
    }
}

// ============================================================================
// Index (replayable, read-only view)
// ============================================================================

/// In-memory view of the log: every incident by id plus the blocking
/// incident per process. Built by replaying entries in order.
#[derive(Debug, Default, Clone)]
pub struct IncidentIndex {
    incidents: BTreeMap<String, Incident>,
    blocking: HashMap<String, String>,
    max_seq: u64,
}

impl IncidentIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.apply(entry);
        }
        index
    }

    /// Replay the log at `path` without taking the writer role
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::from_entries(IncidentLog::read_entries(path)?))
    }

    fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Opened { incident_id, process_id, opened_at, trigger } => {
                if let Some(seq) = parse_seq(&incident_id) {
                    self.max_seq = self.max_seq.max(seq);
                }
                self.blocking.insert(process_id.clone(), incident_id.clone());
                self.incidents
                    .insert(incident_id.clone(), Incident::new(incident_id, process_id, trigger, opened_at));
            }
            LogEntry::AttemptRecorded { incident_id, attempt } => {
                if let Some(inc) = self.incidents.get_mut(&incident_id) {
                    inc.strategies_tried.push(attempt);
                }
            }
            LogEntry::Resolved { incident_id, closed_at } => {
                let process_id = self.incidents.get_mut(&incident_id).map(|inc| {
                    inc.status = IncidentStatus::Resolved;
                    inc.closed_at = Some(closed_at);
                    inc.process_id.clone()
                });
                if let Some(process_id) = process_id {
                    self.unblock(&process_id, &incident_id);
                }
            }
            LogEntry::Escalated { record } => {
                if let Some(inc) = self.incidents.get_mut(&record.incident_id) {
                    inc.status = IncidentStatus::Escalated;
                    inc.escalation = Some(record);
                }
            }
            LogEntry::Acknowledged { incident_id, acknowledged_at, by } => {
                let process_id = self.incidents.get_mut(&incident_id).map(|inc| {
                    if let Some(esc) = inc.escalation.as_mut() {
                        esc.acknowledged_at = Some(acknowledged_at);
                        esc.acknowledged_by = by;
                    }
                    inc.closed_at = Some(acknowledged_at);
                    inc.process_id.clone()
                });
                if let Some(process_id) = process_id {
                    self.unblock(&process_id, &incident_id);
                }
            }
        }
    }

    fn unblock(&mut self, process_id: &str, incident_id: &str) {
        if self.blocking.get(process_id).is_some_and(|id| id == incident_id) {
            self.blocking.remove(process_id);
        }
    }

    pub fn get(&self, incident_id: &str) -> Option<&Incident> {
        self.incidents.get(incident_id)
    }

    /// The OPEN or unacknowledged ESCALATED incident for a process
    pub fn active_for(&self, process_id: &str) -> Option<&Incident> {
        self.blocking.get(process_id).and_then(|id| self.incidents.get(id))
    }

    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    pub fn open_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values().filter(|i| i.is_open())
    }

    pub fn awaiting_acknowledgement(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values().filter(|i| i.awaiting_acknowledgement())
    }

    /// Lifetime recovery counters over every replayed incident
    pub fn stats(&self) -> RecoveryStats {
        let mut stats = RecoveryStats::default();
        for incident in self.incidents.values() {
            stats.total_incidents += 1;
            match incident.status {
                IncidentStatus::Open => stats.open_incidents += 1,
                IncidentStatus::Resolved => stats.resolved_incidents += 1,
                IncidentStatus::Escalated => stats.escalations += 1,
            }
            for attempt in &incident.strategies_tried {
                stats.total_recoveries += 1;
                match attempt.outcome {
                    AttemptOutcome::Success => stats.successful_recoveries += 1,
                    AttemptOutcome::Timeout => {
                        stats.failed_recoveries += 1;
                        stats.timed_out_recoveries += 1;
                    }
                    AttemptOutcome::Failure => stats.failed_recoveries += 1,
                }
            }
        }
        stats
    }

    fn next_incident_id(&self, process_id: &str, now: DateTime<Utc>) -> String {
        format!("INC-{}-{}-{}", now.format("%Y%m%d-%H%M%S"), process_id, self.max_seq + 1)
    }
}

/// Recovery statistics derived from the incident log
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_incidents: u64,
    pub open_incidents: u64,
    pub resolved_incidents: u64,
    pub escalations: u64,
    /// Strategy attempts across all incidents
    pub total_recoveries: u64,
    pub successful_recoveries: u64,
    /// Includes timeouts
    pub failed_recoveries: u64,
    pub timed_out_recoveries: u64,
}

impl RecoveryStats {
    /// Percentage of attempts that succeeded; `None` before the first attempt
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_recoveries == 0 {
            return None;
        }
        Some(self.successful_recoveries as f64 / self.total_recoveries as f64 * 100.0)
    }
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "incidents {} (open {}, resolved {}, escalated {}), recoveries {} (successful {}, failed {}, timed out {})",
            self.total_incidents,
            self.open_incidents,
            self.resolved_incidents,
            self.escalations,
            self.total_recoveries,
            self.successful_recoveries,
            self.failed_recoveries,
            self.timed_out_recoveries
        )?;
        if let Some(rate) = self.success_rate() {
            write!(f, ", success rate {rate:.1}%")?;
        }
        Ok(())
    }
}

/// Trailing `-<seq>` of an incident id
fn parse_seq(incident_id: &str) -> Option<u64> {
    incident_id.rsplit('-').next().and_then(|s| s.parse().ok())
}

// ============================================================================
// Manager (single writer)
// ============================================================================

/// Owns the incident log. Every mutation is validated, appended and fsynced,
/// and only then applied to the in-memory index.
#[derive(Debug)]
pub struct IncidentManager {
    log: IncidentLog,
    index: IncidentIndex,
}

impl IncidentManager {
    /// Open the log at `path`, replaying it to rebuild the index
    pub fn open(path: &Path) -> Result<Self, IncidentError> {
        let index = IncidentIndex::load(path)?;
        let log = IncidentLog::open(path)?;

        let blocking = index.blocking.len();
        info!(
            path = %path.display(),
            incidents = index.incidents.len(),
            blocking,
            "📒 Incident log replayed"
        );
        Ok(Self { log, index })
    }

    pub fn index(&self) -> &IncidentIndex {
        &self.index
    }

    pub fn get(&self, incident_id: &str) -> Option<&Incident> {
        self.index.get(incident_id)
    }

    pub fn active_incident(&self, process_id: &str) -> Option<&Incident> {
        self.index.active_for(process_id)
    }

    fn commit(&mut self, entry: LogEntry) -> Result<(), IncidentError> {
        self.log.append(&entry)?;
        self.index.apply(entry);
        Ok(())
    }

    fn require(&self, incident_id: &str) -> Result<&Incident, IncidentError> {
        self.index
            .get(incident_id)
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))
    }

    /// Open a new incident. At most one blocking incident per process.
    pub fn open_incident(
        &mut self,
        process_id: &str,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<Incident, IncidentError> {
        if let Some(active) = self.index.active_for(process_id) {
            let incident_id = active.incident_id.clone();
            let process_id = process_id.to_string();
            return Err(if active.is_open() {
                IncidentError::AlreadyOpen { process_id, incident_id }
            } else {
                IncidentError::AwaitingAcknowledgement { process_id, incident_id }
            });
        }

        let incident_id = self.index.next_incident_id(process_id, now);
        self.commit(LogEntry::Opened {
            incident_id: incident_id.clone(),
            process_id: process_id.to_string(),
            opened_at: now,
            trigger,
        })?;
        info!(incident = %incident_id, process = process_id, %trigger, "🚨 Incident opened");
        self.require(&incident_id).cloned()
    }

    /// Append a strategy attempt to an open incident
    pub fn record_attempt(&mut self, incident_id: &str, attempt: StrategyAttempt) -> Result<(), IncidentError> {
        let incident = self.require(incident_id)?;
        match incident.status {
            IncidentStatus::Open => {}
            IncidentStatus::Escalated => return Err(IncidentError::Frozen(incident_id.to_string())),
            IncidentStatus::Resolved => return Err(IncidentError::Closed(incident_id.to_string())),
        }
        self.commit(LogEntry::AttemptRecorded { incident_id: incident_id.to_string(), attempt })
    }

    /// Resolve an incident.
    ///
    /// Allowed only when the most recent attempt succeeded and
    /// `heartbeat_at` is newer than that attempt's completion.
    pub fn close(
        &mut self,
        incident_id: &str,
        heartbeat_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Incident, IncidentError> {
        let incident = self.require(incident_id)?;
        match incident.status {
            IncidentStatus::Open => {}
            IncidentStatus::Escalated => return Err(IncidentError::Frozen(incident_id.to_string())),
            IncidentStatus::Resolved => return Err(IncidentError::Closed(incident_id.to_string())),
        }

        let invalid = |reason: String| IncidentError::InvalidTransition {
            incident_id: incident_id.to_string(),
            reason,
        };
        let last = incident
            .last_attempt()
            .ok_or_else(|| invalid("no recovery attempt recorded".to_string()))?;
        if !last.succeeded() {
            return Err(invalid(format!("last attempt {} was {}", last.strategy_name, last.outcome)));
        }
        if heartbeat_at <= last.completed_at() {
            return Err(invalid(format!(
                "heartbeat {} is not newer than attempt completion {}",
                heartbeat_at.to_rfc3339(),
                last.completed_at().to_rfc3339()
            )));
        }

        self.commit(LogEntry::Resolved { incident_id: incident_id.to_string(), closed_at: now })?;
        info!(incident = incident_id, "✅ Incident resolved");
        self.require(incident_id).cloned()
    }

    /// Move an open incident to ESCALATED, freezing further attempts
    pub fn escalate(
        &mut self,
        incident_id: &str,
        reason: &str,
        notified_channels: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<EscalationRecord, IncidentError> {
        let incident = self.require(incident_id)?;
        match incident.status {
            IncidentStatus::Open => {}
            IncidentStatus::Escalated => {
                return Err(IncidentError::InvalidTransition {
                    incident_id: incident_id.to_string(),
                    reason: "already escalated".to_string(),
                })
            }
            IncidentStatus::Resolved => return Err(IncidentError::Closed(incident_id.to_string())),
        }

        let record = EscalationRecord {
            incident_id: incident_id.to_string(),
            process_id: incident.process_id.clone(),
            escalated_at: now,
            reason: reason.to_string(),
            notified_channels,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        self.commit(LogEntry::Escalated { record: record.clone() })?;
        warn!(incident = incident_id, reason, "🆘 Incident escalated to a human");
        Ok(record)
    }

    /// Record the human acknowledgement of an escalation, unfreezing the process
    pub fn acknowledge(
        &mut self,
        incident_id: &str,
        by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident, IncidentError> {
        let incident = self.require(incident_id)?;
        if !incident.awaiting_acknowledgement() {
            let reason = if incident.status == IncidentStatus::Escalated {
                "escalation already acknowledged".to_string()
            } else {
                format!("incident is {}, not escalated", incident.status)
            };
            return Err(IncidentError::InvalidTransition { incident_id: incident_id.to_string(), reason });
        }

        self.commit(LogEntry::Acknowledged {
            incident_id: incident_id.to_string(),
            acknowledged_at: now,
            by: by.clone(),
        })?;
        info!(incident = incident_id, by = by.as_deref().unwrap_or("unknown"), "👍 Escalation acknowledged");
        self.require(incident_id).cloned()
    }
}
