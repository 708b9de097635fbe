//! Process Lock File Module
//!
//! Guarantees a single writer for shared state: one watchdog per data
//! directory (the incident log has exactly one writer), and one emergency
//! bootstrap mutating the environment at a time.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::sys;

/// Process lock file manager
///
/// Creates a lock file holding the current process ID. The file is created
/// with `create_new`, so two racing instances cannot both win.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    /// Lock held by a running watchdog
    pub const WATCHDOG: &'static str = ".warden.lock";
    /// Lock held by the emergency bootstrap while it mutates state
    pub const BOOTSTRAP: &'static str = ".bootstrap.lock";

    /// Acquire the named lock in the given directory
    ///
    /// Returns an error if another live process already holds it.
    pub fn acquire<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref();

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create lock directory: {}", dir.display()))?;

        let lock_path = dir.join(name);

        if lock_path.exists() {
            match Self::check_existing_lock(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "Lock {} is held by a running process (PID: {})\n\
                         \n\
                         To resolve this:\n\
                         1. Stop the other instance, or\n\
                         2. If no other instance is running, remove the stale lock file:\n\
                            rm {}",
                        name,
                        pid,
                        lock_path.display()
                    );
                }
                Ok(None) => {
                    tracing::info!(lock = %lock_path.display(), "Removing stale lock file from previous instance");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!("Unreadable lock file, replacing it: {}", e);
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                bail!("Lost the race for lock {}", lock_path.display());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create lock file: {}", lock_path.display()));
            }
        };

        writeln!(file, "{pid}").context("Failed to write PID to lock file")?;

        tracing::debug!("Acquired process lock (PID: {}) at {}", pid, lock_path.display());

        Ok(Self { lock_path, owned: true })
    }

    /// Pid of the live process holding the named lock, if any
    pub fn holder(dir: &Path, name: &str) -> Option<u32> {
        Self::holder_of(&dir.join(name))
    }

    /// Pid of the live process holding the lock at `lock_path`, if any
    pub fn holder_of(lock_path: &Path) -> Option<u32> {
        Self::check_existing_lock(lock_path).ok().flatten()
    }

    /// Check if an existing lock file is held by a running process
    ///
    /// Returns:
    /// - `Ok(Some(pid))` if the lock is held by a running process
    /// - `Ok(None)` if the lock file exists but the process is not running (stale)
    /// - `Err(_)` if there was an error reading/parsing the lock file
    fn check_existing_lock(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file contents")?;

        let pid: u32 = contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")?;

        if sys::pid_alive(pid) {
            Ok(Some(pid))
        } else {
            Ok(None)
        }
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!("Failed to remove lock file: {}", e);
            } else {
                tracing::debug!("Released process lock at {}", self.lock_path.display());
            }
            self.owned = false;
        }
    }

    /// Path to the lock file
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
