//! OS-level liveness probe, independent of the heartbeat

use std::io;
use std::path::{Path, PathBuf};

use crate::heartbeat::HeartbeatError;
use crate::sys;

/// What the process table says about a pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Alive and, if a pattern is configured, still our program
    Running,
    /// Gone or a zombie
    Missing,
    /// Alive but the pid now belongs to a different program
    Reused,
}

/// Inability to observe. Never escalates a verdict beyond SUSPECT.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("process table unavailable for pid {pid}: {source}")]
    ProcessTable {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("process table scan failed: {0}")]
    Scan(#[source] io::Error),
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
}

/// Process-table lookups, swappable for tests
pub trait ProcessProbe: Send + Sync {
    /// Check a pid, optionally verifying its command line contains `match_pattern`
    fn presence(&self, pid: u32, match_pattern: Option<&str>) -> Result<Presence, DetectionError>;

    /// Lowest live pid whose command line contains `match_pattern`
    fn find(&self, match_pattern: &str) -> Result<Option<u32>, DetectionError>;
}

/// `/proc`-backed probe
#[derive(Debug, Clone)]
pub struct ProcfsProbe {
    proc_root: PathBuf,
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new(sys::PROC_ROOT)
    }
}

impl ProcfsProbe {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self { proc_root: proc_root.into() }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }
}

impl ProcessProbe for ProcfsProbe {
    fn presence(&self, pid: u32, match_pattern: Option<&str>) -> Result<Presence, DetectionError> {
        if !sys::pid_alive(pid) {
            return Ok(Presence::Missing);
        }

        let gone_or = |e: io::Error| -> Result<Presence, DetectionError> {
            // Exited between kill(0) and the /proc read
            if e.kind() == io::ErrorKind::NotFound {
                Ok(Presence::Missing)
            } else {
                Err(DetectionError::ProcessTable { pid, source: e })
            }
        };

        match sys::process_state(&self.proc_root, pid) {
            Ok('Z' | 'X') => return Ok(Presence::Missing),
            Ok(_) => {}
            Err(e) => return gone_or(e),
        }

        let Some(pattern) = match_pattern else {
            return Ok(Presence::Running);
        };
        match sys::cmdline(&self.proc_root, pid) {
            Ok(cmd) if cmd.contains(pattern) => Ok(Presence::Running),
            Ok(_) => Ok(Presence::Reused),
            Err(e) => gone_or(e),
        }
    }

    fn find(&self, match_pattern: &str) -> Result<Option<u32>, DetectionError> {
        let pids = sys::find_processes(&self.proc_root, match_pattern).map_err(DetectionError::Scan)?;
        // Matches can be zombies awaiting reap
        Ok(pids
            .into_iter()
            .find(|&pid| matches!(self.presence(pid, Some(match_pattern)), Ok(Presence::Running))))
    }
}
