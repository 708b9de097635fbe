//! Control inbox: CLI → running watchdog requests as JSON files.
//!
//! The watchdog is the only writer of the incident log, so `warden ack` and
//! `warden recover` drop a request file here and the watchdog applies it on
//! its next control tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::storage::{self, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ControlRequest {
    Acknowledge {
        incident_id: String,
        #[serde(default)]
        by: Option<String>,
        requested_at: DateTime<Utc>,
    },
    Recover {
        process_id: String,
        requested_at: DateTime<Utc>,
    },
}

impl ControlRequest {
    fn kind(&self) -> &'static str {
        match self {
            ControlRequest::Acknowledge { .. } => "ack",
            ControlRequest::Recover { .. } => "recover",
        }
    }

    fn requested_at(&self) -> DateTime<Utc> {
        match self {
            ControlRequest::Acknowledge { requested_at, .. } | ControlRequest::Recover { requested_at, .. } => {
                *requested_at
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlInbox {
    dir: PathBuf,
}

impl ControlInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop a request; returns the request file path
    pub fn submit(&self, request: &ControlRequest) -> Result<PathBuf, StorageError> {
        let stamp = request.requested_at().timestamp_nanos_opt().unwrap_or_default();
        let name = format!("{stamp:020}-{}-{}.json", std::process::id(), request.kind());
        let path = self.dir.join(name);
        storage::write_json_atomic(&path, request)?;
        Ok(path)
    }

    /// Pending requests in submission order. Undecodable files come back as
    /// errors so the caller can discard them.
    pub fn drain(&self) -> Result<Vec<(PathBuf, Result<ControlRequest, StorageError>)>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { path: self.dir.clone(), source }),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let request = storage::read_json::<ControlRequest>(&path).and_then(|r| {
                    r.ok_or_else(|| StorageError::Io {
                        path: path.clone(),
                        source: io::Error::from(io::ErrorKind::NotFound),
                    })
                });
                (path, request)
            })
            .collect())
    }

    /// Remove a handled request
    pub fn complete(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove handled control request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_submit_then_drain_in_order() {
        let dir = tempdir().unwrap();
        let inbox = ControlInbox::new(dir.path().join("inbox"));
        let t0 = Utc::now();

        inbox
            .submit(&ControlRequest::Recover { process_id: "launcher".into(), requested_at: t0 })
            .unwrap();
        inbox
            .submit(&ControlRequest::Acknowledge {
                incident_id: "INC-1".into(),
                by: Some("oncall".into()),
                requested_at: t0 + chrono::Duration::seconds(1),
            })
            .unwrap();

        let pending = inbox.drain().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(matches!(pending[0].1, Ok(ControlRequest::Recover { .. })));
        assert!(matches!(pending[1].1, Ok(ControlRequest::Acknowledge { .. })));

        for (path, _) in &pending {
            inbox.complete(path);
        }
        assert!(inbox.drain().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_request_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("0001-bad.json"), "not json").unwrap();
        fs::write(dir.path().join("leftover.json.99.tmp"), "{}").unwrap();
        let inbox = ControlInbox::new(dir.path());

        let pending = inbox.drain().unwrap();
        assert_eq!(pending.len(), 1, "temp files are ignored");
        assert!(pending[0].1.is_err());
    }

    #[test]
    fn test_missing_inbox_is_empty() {
        let dir = tempdir().unwrap();
        assert!(ControlInbox::new(dir.path().join("nope")).drain().unwrap().is_empty());
    }
}
