//! Watchdog-side view of a supervised process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-process state machine position
///
/// `MONITORING → SUSPECT → RECOVERY_TRIGGERED → COOLDOWN → MONITORING`,
/// with `ESCALATED` reachable from anywhere until acknowledged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchState {
    #[default]
    Monitoring,
    Suspect,
    RecoveryTriggered,
    Cooldown,
    Escalated,
    /// Process announced a graceful shutdown
    Stopped,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchState::Monitoring => write!(f, "MONITORING"),
            WatchState::Suspect => write!(f, "SUSPECT"),
            WatchState::RecoveryTriggered => write!(f, "RECOVERY_TRIGGERED"),
            WatchState::Cooldown => write!(f, "COOLDOWN"),
            WatchState::Escalated => write!(f, "ESCALATED"),
            WatchState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Owned exclusively by the watchdog; reset when the watchdog restarts,
/// kept across restarts of the supervised process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    pub process_id: String,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_known_heartbeat: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            pid: None,
            started_at: None,
            last_known_heartbeat: None,
            restart_count: 0,
            last_restart_at: None,
            cooldown_until: None,
        }
    }

    /// Adopt a pid learned from a heartbeat or pid file.
    ///
    /// Returns true when this is a new pid.
    pub fn observe_pid(&mut self, pid: u32, seen_at: DateTime<Utc>) -> bool {
        if self.pid == Some(pid) {
            return false;
        }
        self.pid = Some(pid);
        self.started_at = Some(seen_at);
        true
    }

    /// Record a completed recovery attempt and arm the cooldown.
    pub fn record_restart(&mut self, new_pid: Option<u32>, completed_at: DateTime<Utc>, cooldown: Duration) {
        self.restart_count = self.restart_count.saturating_add(1);
        self.last_restart_at = Some(completed_at);
        self.cooldown_until = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|d| completed_at.checked_add_signed(d));
        if let Some(pid) = new_pid {
            self.pid = Some(pid);
            self.started_at = Some(completed_at);
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Clear the restart budget after a human acknowledged an escalation
    pub fn reset_restarts(&mut self) {
        self.restart_count = 0;
        self.cooldown_until = None;
    }
}
