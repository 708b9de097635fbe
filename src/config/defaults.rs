//! System-wide default constants.
//!
//! Every tunable in `warden.toml` falls back to one of these values.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Heartbeat Channel
// ============================================================================

/// Interval at which a supervised process writes its heartbeat (seconds).
pub const HEARTBEAT_EMIT_INTERVAL_SECS: u64 = 20;

/// Age after which a heartbeat is stale (seconds).
///
/// 90 s = 4.5 emit intervals, so one or two slow emits never look like death.
pub const STALENESS_THRESHOLD_SECS: u64 = 90;

// ============================================================================
// Watchdog Loop
// ============================================================================

/// Health monitor poll interval (seconds).
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Consecutive stale polls required to confirm FAILED.
pub const CONFIRMATION_POLLS: u32 = 2;

/// Minimum gap between recovery attempts on one process, across incidents (seconds).
pub const COOLDOWN_SECS: u64 = 60;

/// Lifetime recovery attempts per process before forced escalation.
pub const GLOBAL_RESTART_CAP: u32 = 5;

/// Interval at which the watchdog writes its own heartbeat (seconds).
pub const SELF_HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// Grace period between SIGTERM and SIGKILL when terminating a process (seconds).
pub const TERMINATE_GRACE_SECS: u64 = 10;

/// Root of everything the watchdog persists.
pub const DATA_DIR: &str = "./data";

// ============================================================================
// Strategy Catalogue
// ============================================================================

/// Attempts allowed per strategy per incident.
pub const MAX_ATTEMPTS_PER_INCIDENT: u32 = 1;

pub const QUICK_RESTART_TIMEOUT_SECS: u64 = 30;
pub const SAFE_MODE_TIMEOUT_SECS: u64 = 120;
pub const CONFIG_ROLLBACK_TIMEOUT_SECS: u64 = 300;
pub const DEPENDENCY_RESTART_TIMEOUT_SECS: u64 = 600;
pub const BACKUP_RESTORE_TIMEOUT_SECS: u64 = 1_800;
/// 7 200 = 2 hours.
pub const FULL_BOOTSTRAP_TIMEOUT_SECS: u64 = 7_200;

/// Arguments appended to the launch command for safe mode.
pub const SAFE_MODE_ARG: &str = "--safe-mode";

/// Environment variable set on a safe-mode launch.
pub const SAFE_MODE_ENV: &str = "WARDEN_SAFE_MODE";

/// Program the full_bootstrap strategy runs.
pub const BOOTSTRAP_PROGRAM: &str = "emergency-bootstrap";

// ============================================================================
// Escalation
// ============================================================================

/// HTTP timeout for webhook escalation delivery (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Directory for file-drop escalation notices, relative to the data dir.
pub const NOTIFICATION_DIR: &str = "notifications";

// ============================================================================
// Emergency Bootstrap
// ============================================================================

/// Timeout for one pinned install command (seconds).
pub const INSTALL_TIMEOUT_SECS: u64 = 120;

/// Timeout for a module probe command (seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 15;

/// How long to wait for a started service to show up (seconds).
pub const SERVICE_STARTUP_WAIT_SECS: u64 = 5;

/// Minimum free space on the data filesystem (MB).
pub const MIN_FREE_DISK_MB: u64 = 500;

// ============================================================================
// Environment
// ============================================================================

/// Path override for `warden.toml`.
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

/// Path override for `bootstrap.toml`.
pub const BOOTSTRAP_MANIFEST_ENV: &str = "WARDEN_BOOTSTRAP_MANIFEST";
