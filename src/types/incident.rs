//! Incident lifecycle types: Incident, StrategyAttempt, EscalationRecord

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Trigger & Status
// ============================================================================

/// What caused an incident to be opened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Heartbeat stayed stale through the confirmation window
    StaleHeartbeat,
    /// OS lookup failed: pid gone, zombie, or reused by another program
    ProcessExit,
    /// Operator requested recovery
    Explicit,
}

impl Trigger {
    pub const ALL: [Trigger; 3] = [Trigger::StaleHeartbeat, Trigger::ProcessExit, Trigger::Explicit];
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::StaleHeartbeat => write!(f, "stale_heartbeat"),
            Trigger::ProcessExit => write!(f, "process_exit"),
            Trigger::Explicit => write!(f, "explicit"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    Resolved,
    Escalated,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "OPEN"),
            IncidentStatus::Resolved => write!(f, "RESOLVED"),
            IncidentStatus::Escalated => write!(f, "ESCALATED"),
        }
    }
}

// ============================================================================
// Strategy Attempt
// ============================================================================

/// Result of a single remediation attempt.
///
/// `Timeout` counts as a failure for strategy selection but is kept
/// distinct in the audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "SUCCESS"),
            AttemptOutcome::Failure => write!(f, "FAILURE"),
            AttemptOutcome::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// One execution of a strategy against an incident. Appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub strategy_name: String,
    pub started_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyAttempt {
    /// Wall-clock completion time derived from start and duration
    pub fn completed_at(&self) -> DateTime<Utc> {
        i64::try_from(self.duration_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|d| self.started_at.checked_add_signed(d))
            .unwrap_or(self.started_at)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

// ============================================================================
// Escalation
// ============================================================================

/// Hand-off to a human. While unacknowledged it freezes automated recovery
/// for the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationRecord {
    pub incident_id: String,
    pub process_id: String,
    pub escalated_at: DateTime<Utc>,
    pub reason: String,
    pub notified_channels: Vec<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
}

impl EscalationRecord {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

// ============================================================================
// Incident
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub incident_id: String,
    pub process_id: String,
    pub opened_at: DateTime<Utc>,
    pub trigger: Trigger,
    pub strategies_tried: Vec<StrategyAttempt>,
    pub status: IncidentStatus,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
}

impl Incident {
    pub fn new(incident_id: String, process_id: String, trigger: Trigger, opened_at: DateTime<Utc>) -> Self {
        Self {
            incident_id,
            process_id,
            opened_at,
            trigger,
            strategies_tried: Vec::new(),
            status: IncidentStatus::Open,
            closed_at: None,
            escalation: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }

    /// Escalated and still waiting for a human
    pub fn awaiting_acknowledgement(&self) -> bool {
        self.status == IncidentStatus::Escalated
            && self.escalation.as_ref().is_some_and(|e| !e.is_acknowledged())
    }

    /// Whether this incident still blocks its process (open or frozen)
    pub fn is_blocking(&self) -> bool {
        self.is_open() || self.awaiting_acknowledgement()
    }

    /// Number of attempts already made with the named strategy
    pub fn attempts_of(&self, strategy_name: &str) -> u32 {
        let count = self
            .strategies_tried
            .iter()
            .filter(|a| a.strategy_name == strategy_name)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn last_attempt(&self) -> Option<&StrategyAttempt> {
        self.strategies_tried.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(name: &str, outcome: AttemptOutcome) -> StrategyAttempt {
        StrategyAttempt {
            strategy_name: name.to_string(),
            started_at: Utc::now(),
            timeout_seconds: 30,
            outcome,
            duration_ms: 1_500,
            error: None,
        }
    }

    #[test]
    fn test_completed_at_adds_duration() {
        let a = attempt("quick_restart", AttemptOutcome::Success);
        assert_eq!(a.completed_at() - a.started_at, chrono::Duration::milliseconds(1_500));
    }

    #[test]
    fn test_attempt_counting() {
        let mut inc = Incident::new("INC-1".into(), "launcher".into(), Trigger::StaleHeartbeat, Utc::now());
        inc.strategies_tried.push(attempt("quick_restart", AttemptOutcome::Timeout));
        inc.strategies_tried.push(attempt("safe_mode", AttemptOutcome::Failure));
        inc.strategies_tried.push(attempt("quick_restart", AttemptOutcome::Success));
        assert_eq!(inc.attempts_of("quick_restart"), 2);
        assert_eq!(inc.attempts_of("backup_restore"), 0);
        assert!(inc.last_attempt().unwrap().succeeded());
    }

    #[test]
    fn test_blocking_states() {
        let mut inc = Incident::new("INC-1".into(), "launcher".into(), Trigger::ProcessExit, Utc::now());
        assert!(inc.is_blocking());

        inc.status = IncidentStatus::Escalated;
        inc.escalation = Some(EscalationRecord {
            incident_id: "INC-1".into(),
            process_id: "launcher".into(),
            escalated_at: Utc::now(),
            reason: "exhausted".into(),
            notified_channels: vec!["log".into()],
            acknowledged_at: None,
            acknowledged_by: None,
        });
        assert!(inc.awaiting_acknowledgement());
        assert!(inc.is_blocking());

        if let Some(e) = inc.escalation.as_mut() {
            e.acknowledged_at = Some(Utc::now());
        }
        assert!(!inc.is_blocking());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&IncidentStatus::Escalated).unwrap(), "\"ESCALATED\"");
        assert_eq!(serde_json::to_string(&Trigger::StaleHeartbeat).unwrap(), "\"stale_heartbeat\"");
        assert_eq!(serde_json::to_string(&AttemptOutcome::Timeout).unwrap(), "\"TIMEOUT\"");
    }
}
