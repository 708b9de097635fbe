//! OS probes: signals, the `/proc` process table and filesystem capacity.
//!
//! Thin wrappers over `libc` and procfs shared by the watchdog, the
//! lock file and the emergency bootstrap.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Default procfs mount point
pub const PROC_ROOT: &str = "/proc";

/// Check whether a pid refers to a live process (`kill(pid, 0)`).
///
/// `EPERM` still means the process exists, just not ours to signal.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send a signal to a pid. A process that is already gone is not an error.
pub fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let raw = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    if raw <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }

    let result = unsafe { libc::kill(raw, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Signal every member of a process group (`kill(-pgid, sig)`).
/// An empty group is not an error.
pub fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let raw = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pgid {pgid} out of range")))?;
    if raw <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {pgid}"),
        ));
    }

    let result = unsafe { libc::kill(-raw, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// SIGKILLs a child's process group when dropped unless disarmed.
///
/// Spawn the child with `process_group(0)` so its pid is the pgid and
/// anything it forks goes down with it.
#[derive(Debug)]
pub struct GroupKillGuard {
    pgid: Option<u32>,
}

impl GroupKillGuard {
    pub fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The child finished on its own; leave the group alone
    pub fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match signal_group(pgid, libc::SIGKILL) {
                Ok(()) => debug!(pgid, "Killed abandoned process group"),
                Err(e) => warn!(pgid, error = %e, "Could not kill abandoned process group"),
            }
        }
    }
}

/// Scheduler state letter from `/proc/<pid>/stat` (`R`, `S`, `Z`, ...).
pub fn process_state(proc_root: &Path, pid: u32) -> io::Result<char> {
    let stat = fs::read_to_string(proc_root.join(pid.to_string()).join("stat"))?;
    // comm may contain spaces and parens; the state follows the last ')'
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("malformed stat for pid {pid}")))
}

/// Command line of a process with NUL separators replaced by spaces.
pub fn cmdline(proc_root: &Path, pid: u32) -> io::Result<String> {
    let raw = fs::read(proc_root.join(pid.to_string()).join("cmdline"))?;
    let text = String::from_utf8_lossy(&raw);
    Ok(text.trim_end_matches('\0').replace('\0', " "))
}

/// Pids whose command line contains `pattern`, lowest first. Skips ourselves.
pub fn find_processes(proc_root: &Path, pattern: &str) -> io::Result<Vec<u32>> {
    let own = std::process::id();
    let mut pids: Vec<u32> = fs::read_dir(proc_root)?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
        .filter(|&pid| pid != own)
        .filter(|&pid| {
            // Processes exit between readdir and read; treat those as non-matching
            cmdline(proc_root, pid).is_ok_and(|cmd| cmd.contains(pattern))
        })
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
pub fn disk_free(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        #[allow(clippy::unnecessary_cast)]
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn test_bogus_pids_not_alive() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(u32::MAX));
        assert!(!pid_alive(999_999_999));
    }

    #[test]
    fn test_signal_zero_to_self() {
        assert!(send_signal(std::process::id(), 0).is_ok());
        assert!(send_signal(0, libc::SIGTERM).is_err());
    }

    #[test]
    fn test_signal_group_rejects_reserved_groups() {
        assert!(signal_group(0, libc::SIGKILL).is_err());
        assert!(signal_group(1, libc::SIGKILL).is_err());
        assert!(signal_group(999_999_999, 0).is_ok(), "empty group is not an error");
    }

    #[test]
    fn test_own_state_and_cmdline() {
        let root = Path::new(PROC_ROOT);
        let pid = std::process::id();
        let state = process_state(root, pid).unwrap();
        assert_ne!(state, 'Z');
        assert!(!cmdline(root, pid).unwrap().is_empty());
    }

    #[test]
    fn test_stat_with_parens_in_comm() {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join("42");
        fs::create_dir_all(&pid_dir).unwrap();
        fs::write(pid_dir.join("stat"), "42 (weird) name) Z 1 42 42 0").unwrap();
        assert_eq!(process_state(dir.path(), 42).unwrap(), 'Z');
    }

    #[test]
    fn test_find_processes_in_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        for (pid, cmd) in [(10, "launcher\0--port\09000\0"), (11, "sshd\0"), (12, "python\0launcher.py\0")] {
            let pid_dir = dir.path().join(pid.to_string());
            fs::create_dir_all(&pid_dir).unwrap();
            fs::write(pid_dir.join("cmdline"), cmd).unwrap();
        }
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let found = find_processes(dir.path(), "launcher").unwrap();
        assert_eq!(found, vec![10, 12]);
        assert_eq!(cmdline(dir.path(), 10).unwrap(), "launcher --port 9000");
    }

    #[test]
    fn test_disk_free_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(disk_free(dir.path()).unwrap() > 0);
        assert!(disk_free(Path::new("/definitely/not/here")).is_err());
    }
}
