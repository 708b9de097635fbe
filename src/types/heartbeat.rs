//! Heartbeat record: the only channel from the supervised process to the watchdog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle marker carried by a heartbeat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatState {
    /// Normal periodic emit
    #[default]
    Running,
    /// Final record written on an intentional stop
    GracefulShutdown,
}

/// A single heartbeat as persisted to the well-known path.
///
/// `emitted_at` strictly increases per `process_id`; `sequence` is a
/// monotonic counter that survives emitter restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    pub process_id: String,
    pub emitted_at: DateTime<Utc>,
    pub sequence: u64,
    /// OS pid of the emitter, lets the watchdog adopt processes it did not launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub state: HeartbeatState,
}

impl Heartbeat {
    /// Time elapsed since emission (zero if the clock went backwards)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.emitted_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// A heartbeat is stale once its age exceeds the threshold
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    pub fn is_graceful_shutdown(&self) -> bool {
        self.state == HeartbeatState::GracefulShutdown
    }
}
