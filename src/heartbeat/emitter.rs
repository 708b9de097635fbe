//! Heartbeat emitter: write side of the heartbeat contract

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::HeartbeatError;
use crate::storage;
use crate::types::{Heartbeat, HeartbeatState};

/// Periodically writes heartbeats for one process.
///
/// Writes are atomic (temp file + rename). `sequence` and `emitted_at`
/// continue from whatever is already on disk, so they keep increasing
/// across emitter restarts.
pub struct HeartbeatEmitter {
    process_id: String,
    path: PathBuf,
    interval: Duration,
    last: Option<(u64, DateTime<Utc>)>,
}

impl HeartbeatEmitter {
    pub fn new(process_id: impl Into<String>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        let process_id = process_id.into();
        let path = path.into();
        let last = storage::read_json::<Heartbeat>(&path)
            .ok()
            .flatten()
            .filter(|hb| hb.process_id == process_id)
            .map(|hb| (hb.sequence, hb.emitted_at));
        Self { process_id, path, interval, last }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one `running` heartbeat
    pub fn emit(&mut self) -> Result<Heartbeat, HeartbeatError> {
        self.write(HeartbeatState::Running)
    }

    /// Write the graceful-shutdown marker
    pub fn emit_shutdown(&mut self) -> Result<Heartbeat, HeartbeatError> {
        self.write(HeartbeatState::GracefulShutdown)
    }

    fn write(&mut self, state: HeartbeatState) -> Result<Heartbeat, HeartbeatError> {
        let mut emitted_at = Utc::now();
        let sequence = match self.last {
            Some((seq, prev)) => {
                if emitted_at <= prev {
                    emitted_at = prev + chrono::Duration::milliseconds(1);
                }
                seq + 1
            }
            None => 1,
        };

        let hb = Heartbeat {
            process_id: self.process_id.clone(),
            emitted_at,
            sequence,
            pid: Some(std::process::id()),
            state,
        };
        storage::write_json_atomic(&self.path, &hb)?;
        self.last = Some((sequence, emitted_at));
        debug!(process = %self.process_id, sequence, "Heartbeat emitted");
        Ok(hb)
    }

    /// Emit on every interval until cancelled, then write the shutdown marker.
    ///
    /// A failed emit is logged and skipped; the next one self-heals.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), HeartbeatError> {
        info!(
            process = %self.process_id,
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "💓 Heartbeat emitter started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.emit() {
                        warn!(process = %self.process_id, error = %e, "Heartbeat emit failed");
                    }
                }
            }
        }

        self.emit_shutdown()?;
        info!(process = %self.process_id, "Heartbeat emitter stopped (graceful shutdown marker written)");
        Ok(())
    }
}
