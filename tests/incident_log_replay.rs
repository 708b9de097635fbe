//! Incident Log Replay Tests
//!
//! The incident log is the only durable record of recovery state. A
//! restarted watchdog must rebuild exactly what the previous one knew.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;

use warden::incident::{IncidentError, IncidentIndex, IncidentManager, LogEntry};
use warden::types::{AttemptOutcome, IncidentStatus, StrategyAttempt, Trigger};
use warden::watchdog::status;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
}

fn attempt(name: &str, outcome: AttemptOutcome, started_at: DateTime<Utc>) -> StrategyAttempt {
    StrategyAttempt {
        strategy_name: name.to_string(),
        started_at,
        timeout_seconds: 30,
        outcome,
        duration_ms: 1_500,
        error: None,
    }
}

#[test]
fn replay_rebuilds_incidents_and_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");

    let (resolved_id, open_id) = {
        let mut mgr = IncidentManager::open(&path).unwrap();
        let first = mgr.open_incident("launcher", Trigger::StaleHeartbeat, t0()).unwrap();
        mgr.record_attempt(&first.incident_id, attempt("quick_restart", AttemptOutcome::Success, t0()))
            .unwrap();
        mgr.close(&first.incident_id, t0() + chrono::Duration::seconds(20), t0() + chrono::Duration::seconds(30))
            .unwrap();

        let second = mgr.open_incident("launcher", Trigger::ProcessExit, t0() + chrono::Duration::hours(1)).unwrap();
        mgr.record_attempt(&second.incident_id, attempt("quick_restart", AttemptOutcome::Timeout, t0()))
            .unwrap();
        (first.incident_id, second.incident_id)
    };

    let mgr = IncidentManager::open(&path).unwrap();
    let resolved = mgr.get(&resolved_id).unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert_eq!(resolved.closed_at, Some(t0() + chrono::Duration::seconds(30)));

    let open = mgr.active_incident("launcher").unwrap();
    assert_eq!(open.incident_id, open_id);
    assert_eq!(open.trigger, Trigger::ProcessExit);
    assert_eq!(open.strategies_tried.len(), 1);
    assert_eq!(open.strategies_tried[0].outcome, AttemptOutcome::Timeout);
}

#[test]
fn ids_keep_increasing_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");

    let first = IncidentManager::open(&path)
        .unwrap()
        .open_incident("launcher", Trigger::StaleHeartbeat, t0())
        .unwrap();
    let second = IncidentManager::open(&path)
        .unwrap()
        .open_incident("worker", Trigger::StaleHeartbeat, t0())
        .unwrap();

    assert!(first.incident_id.ends_with("-launcher-1"), "{}", first.incident_id);
    assert!(second.incident_id.ends_with("-worker-2"), "{}", second.incident_id);
}

#[test]
fn escalation_stays_frozen_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");

    let incident_id = {
        let mut mgr = IncidentManager::open(&path).unwrap();
        let incident = mgr.open_incident("launcher", Trigger::StaleHeartbeat, t0()).unwrap();
        mgr.escalate(&incident.incident_id, "all applicable strategies exhausted after 6 attempts", vec!["log".into()], t0())
            .unwrap();
        incident.incident_id
    };

    let mut mgr = IncidentManager::open(&path).unwrap();
    assert_eq!(status::exit_code(mgr.index()), status::EXIT_AWAITING_HUMAN);
    assert!(matches!(
        mgr.open_incident("launcher", Trigger::StaleHeartbeat, t0()),
        Err(IncidentError::AwaitingAcknowledgement { .. })
    ));
    assert!(matches!(
        mgr.record_attempt(&incident_id, attempt("safe_mode", AttemptOutcome::Success, t0())),
        Err(IncidentError::Frozen(_))
    ));

    mgr.acknowledge(&incident_id, Some("oncall".into()), t0()).unwrap();
    drop(mgr);

    let index = IncidentIndex::load(&path).unwrap();
    assert_eq!(status::exit_code(&index), status::EXIT_HEALTHY);
    assert!(index.active_for("launcher").is_none());
}

#[test]
fn torn_final_line_is_skipped_and_log_stays_appendable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");

    let first_id = IncidentManager::open(&path)
        .unwrap()
        .open_incident("launcher", Trigger::StaleHeartbeat, t0())
        .unwrap()
        .incident_id;

    // Simulate a crash mid-append
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"event":"attempt_recorded","incident_id":"#).unwrap();
    drop(file);

    let mut mgr = IncidentManager::open(&path).unwrap();
    assert!(mgr.get(&first_id).unwrap().strategies_tried.is_empty());
    mgr.record_attempt(&first_id, attempt("quick_restart", AttemptOutcome::Failure, t0())).unwrap();
    drop(mgr);

    let entries = warden::incident::IncidentLog::read_entries(&path).unwrap();
    assert_eq!(entries.len(), 2, "torn line skipped, new record decodable");
    assert!(matches!(entries[1], LogEntry::AttemptRecorded { .. }));
}

#[test]
fn log_lines_carry_event_tags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");

    let mut mgr = IncidentManager::open(&path).unwrap();
    let incident = mgr.open_incident("launcher", Trigger::Explicit, t0()).unwrap();
    mgr.record_attempt(&incident.incident_id, attempt("quick_restart", AttemptOutcome::Success, t0())).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines[0]["event"], "opened");
    assert_eq!(lines[0]["trigger"], "explicit");
    assert_eq!(lines[1]["event"], "attempt_recorded");
    assert_eq!(lines[1]["attempt"]["outcome"], "SUCCESS");
}
