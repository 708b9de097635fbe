//! Heartbeat Channel
//!
//! A supervised process proves liveness by periodically rewriting a small
//! JSON file. The watchdog only ever reads it. `HeartbeatEmitter` is the
//! write side of the contract for processes linked against this crate (and
//! for `warden beat`).

mod emitter;

pub use emitter::HeartbeatEmitter;

use std::path::{Path, PathBuf};

use crate::storage::{self, StorageError};
use crate::types::Heartbeat;

/// Heartbeat read/write errors
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("heartbeat unreadable: {0}")]
    Storage(#[from] StorageError),
    #[error("heartbeat {path} belongs to '{found}', expected '{expected}'")]
    WrongProcess {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

/// Read the latest heartbeat for `process_id`.
///
/// A missing file means the process never emitted: `Ok(None)`.
pub fn read_heartbeat(path: &Path, process_id: &str) -> Result<Option<Heartbeat>, HeartbeatError> {
    let Some(hb) = storage::read_json::<Heartbeat>(path)? else {
        return Ok(None);
    };
    if hb.process_id != process_id {
        return Err(HeartbeatError::WrongProcess {
            path: path.to_path_buf(),
            expected: process_id.to_string(),
            found: hb.process_id,
        });
    }
    Ok(Some(hb))
}
