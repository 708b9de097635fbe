//! Watchdog Configuration - supervised processes, strategies and escalation
//!
//! Each struct implements `Default` (or per-field serde defaults) with values
//! from `defaults`, so an empty `warden.toml` yields the stock strategy table
//! and escalation channels.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::types::{ActionKind, CommandSpec, Trigger};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a watchdog deployment.
///
/// Load with `WardenConfig::load()` which searches:
/// 1. `$WARDEN_CONFIG` env var
/// 2. `./warden.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Loop timing, restart budget and data directory
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Supervised processes
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    /// Ordered remediation table; replaces the stock catalogue when present
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,

    /// Human notification channels
    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogSettings::default(),
            processes: Vec::new(),
            strategies: default_strategies(),
            escalation: EscalationConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Load configuration using the standard search order:
    /// 1. `$WARDEN_CONFIG` environment variable
    /// 2. `./warden.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), processes = config.processes.len(), "Loaded config from WARDEN_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from WARDEN_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "WARDEN_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./warden.toml
        let local = PathBuf::from("warden.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(processes = config.processes.len(), "Loaded config from ./warden.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./warden.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No warden.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Two-pass: unknown keys are logged as warnings first, then the
    /// document is deserialized and validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a supervised process by id
    pub fn process(&self, id: &str) -> Option<&ProcessConfig> {
        self.processes.iter().find(|p| p.id == id)
    }

    /// Validate the whole document for internal consistency.
    ///
    /// Rules:
    /// - Timing values and caps must be positive
    /// - Staleness threshold must exceed the emit interval
    /// - Process ids and strategy names must be unique
    /// - Strategy priorities must be unique
    /// - `command` strategies must carry a command
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let w = &self.watchdog;
        if w.poll_interval_secs == 0 {
            errors.push("watchdog.poll_interval_secs must be > 0".to_string());
        }
        if w.confirmation_polls == 0 {
            errors.push("watchdog.confirmation_polls must be >= 1".to_string());
        }
        if w.global_restart_cap == 0 {
            errors.push("watchdog.global_restart_cap must be >= 1".to_string());
        }
        if w.self_heartbeat_interval_secs == 0 {
            errors.push("watchdog.self_heartbeat_interval_secs must be > 0".to_string());
        }

        let mut ids = HashSet::new();
        for p in &self.processes {
            p.validate(&mut errors);
            if !ids.insert(p.id.as_str()) {
                errors.push(format!("processes: duplicate id '{}'", p.id));
            }
        }

        if self.strategies.is_empty() {
            errors.push("strategies: table must not be empty".to_string());
        }
        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for s in &self.strategies {
            s.validate(&mut errors);
            if !names.insert(s.name.as_str()) {
                errors.push(format!("strategies: duplicate name '{}'", s.name));
            }
            if !priorities.insert(s.priority) {
                errors.push(format!(
                    "strategies.{}: priority {} is already used (priorities must be unique)",
                    s.name, s.priority
                ));
            }
        }

        for c in &self.escalation.channels {
            c.validate(&mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Watchdog Settings
// ============================================================================

/// Loop timing and restart budget shared by every supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSettings {
    /// Seconds between health polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Consecutive stale polls before SUSPECT becomes FAILED.
    #[serde(default = "default_confirmation_polls")]
    pub confirmation_polls: u32,

    /// Minimum seconds between recovery attempts on the same process.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Lifetime attempts per process before forced escalation.
    #[serde(default = "default_global_restart_cap")]
    pub global_restart_cap: u32,

    /// Seconds between the watchdog's own heartbeats.
    #[serde(default = "default_self_heartbeat_interval")]
    pub self_heartbeat_interval_secs: u64,

    /// Incident log, event log, status snapshot, inbox and lock live here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_poll_interval() -> u64 {
    defaults::POLL_INTERVAL_SECS
}
fn default_confirmation_polls() -> u32 {
    defaults::CONFIRMATION_POLLS
}
fn default_cooldown() -> u64 {
    defaults::COOLDOWN_SECS
}
fn default_global_restart_cap() -> u32 {
    defaults::GLOBAL_RESTART_CAP
}
fn default_self_heartbeat_interval() -> u64 {
    defaults::SELF_HEARTBEAT_INTERVAL_SECS
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            confirmation_polls: default_confirmation_polls(),
            cooldown_secs: default_cooldown(),
            global_restart_cap: default_global_restart_cap(),
            self_heartbeat_interval_secs: default_self_heartbeat_interval(),
            data_dir: default_data_dir(),
        }
    }
}

impl WatchdogSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn self_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.self_heartbeat_interval_secs)
    }

    pub fn incident_log_path(&self) -> PathBuf {
        self.data_dir.join("incidents.jsonl")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("watchdog_events.jsonl")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    pub fn self_heartbeat_path(&self) -> PathBuf {
        self.data_dir.join("watchdog.heartbeat.json")
    }

    pub fn notification_dir(&self) -> PathBuf {
        self.data_dir.join(defaults::NOTIFICATION_DIR)
    }
}

// ============================================================================
// Supervised Process
// ============================================================================

/// One supervised process: how to observe it and how to bring it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Identity used in heartbeats, incident ids and file names.
    pub id: String,

    /// Heartbeat file. Defaults to `<data_dir>/heartbeats/<id>.json`.
    #[serde(default)]
    pub heartbeat_path: Option<PathBuf>,

    /// Substring of `/proc/<pid>/cmdline` that identifies this process.
    /// A live pid whose command line lacks it has been reused.
    #[serde(default)]
    pub match_pattern: Option<String>,

    /// File the launched pid is written to (and read from on adoption).
    #[serde(default)]
    pub pid_file: Option<PathBuf>,

    /// Launch command.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_safe_mode_args")]
    pub safe_mode_args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_emit_interval")]
    pub heartbeat_emit_interval_secs: u64,
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    /// Enables config_rollback.
    #[serde(default)]
    pub rollback: Option<RollbackConfig>,

    /// Upstream services restarted, in order, by dependency_restart.
    #[serde(default)]
    pub dependencies: Vec<CommandSpec>,

    /// Enables backup_restore.
    #[serde(default)]
    pub restore: Option<RestoreConfig>,

    /// Environment rebuild run by full_bootstrap.
    #[serde(default = "default_bootstrap_command")]
    pub bootstrap: CommandSpec,
}

fn default_safe_mode_args() -> Vec<String> {
    vec![defaults::SAFE_MODE_ARG.to_string()]
}
fn default_emit_interval() -> u64 {
    defaults::HEARTBEAT_EMIT_INTERVAL_SECS
}
fn default_staleness_threshold() -> u64 {
    defaults::STALENESS_THRESHOLD_SECS
}
fn default_terminate_grace() -> u64 {
    defaults::TERMINATE_GRACE_SECS
}
fn default_bootstrap_command() -> CommandSpec {
    CommandSpec::new(defaults::BOOTSTRAP_PROGRAM, ["repair"])
}

impl ProcessConfig {
    /// Minimal process definition with every optional field defaulted
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heartbeat_path: None,
            match_pattern: None,
            pid_file: None,
            program: program.into(),
            args: Vec::new(),
            safe_mode_args: default_safe_mode_args(),
            working_dir: None,
            env: BTreeMap::new(),
            heartbeat_emit_interval_secs: default_emit_interval(),
            staleness_threshold_secs: default_staleness_threshold(),
            terminate_grace_secs: default_terminate_grace(),
            rollback: None,
            dependencies: Vec::new(),
            restore: None,
            bootstrap: default_bootstrap_command(),
        }
    }

    pub fn heartbeat_file(&self, data_dir: &Path) -> PathBuf {
        self.heartbeat_path
            .clone()
            .unwrap_or_else(|| data_dir.join("heartbeats").join(format!("{}.json", self.id)))
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn emit_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_emit_interval_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        let id = &self.id;
        if id.is_empty() {
            errors.push("processes: id must not be empty".to_string());
        } else if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            errors.push(format!(
                "processes.{id}: id may only contain ASCII letters, digits, '-' and '_'"
            ));
        }
        if self.program.trim().is_empty() {
            errors.push(format!("processes.{id}: program must not be empty"));
        }
        if self.heartbeat_emit_interval_secs == 0 {
            errors.push(format!("processes.{id}: heartbeat_emit_interval_secs must be > 0"));
        }
        if self.staleness_threshold_secs <= self.heartbeat_emit_interval_secs {
            errors.push(format!(
                "processes.{id}: staleness_threshold_secs ({}) must be > heartbeat_emit_interval_secs ({})",
                self.staleness_threshold_secs, self.heartbeat_emit_interval_secs
            ));
        }
        if let Some(r) = &self.restore {
            if r.command.program.trim().is_empty() {
                errors.push(format!("processes.{id}: restore.command.program must not be empty"));
            }
        }
        for dep in &self.dependencies {
            if dep.program.trim().is_empty() {
                errors.push(format!("processes.{id}: dependency program must not be empty"));
            }
        }
    }
}

/// Last-known-good config snapshots for config_rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Live config file the process reads
    pub config_path: PathBuf,
    /// Directory of snapshots; the newest file wins
    pub snapshot_dir: PathBuf,
}

/// State backups for backup_restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Directory of backups; the newest file wins
    pub backup_dir: PathBuf,
    /// Restore command, `{backup}` is replaced by the chosen backup path
    pub command: CommandSpec,
}

// ============================================================================
// Strategy Table
// ============================================================================

/// One row of the remediation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub action: ActionKind,
    /// Required for `action = "command"`
    #[serde(default)]
    pub command: Option<CommandSpec>,
    /// Ascending: lower is tried first. Must be unique.
    pub priority: u32,
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_incident: u32,
    /// Incident triggers this strategy handles
    #[serde(default = "default_applies_to")]
    pub applies_to: Vec<Trigger>,
}

fn default_max_attempts() -> u32 {
    defaults::MAX_ATTEMPTS_PER_INCIDENT
}
fn default_applies_to() -> Vec<Trigger> {
    Trigger::ALL.to_vec()
}

impl StrategyConfig {
    pub fn builtin(action: ActionKind, priority: u32, timeout_secs: u64) -> Self {
        Self {
            name: action.to_string(),
            action,
            command: None,
            priority,
            timeout_secs,
            max_attempts_per_incident: default_max_attempts(),
            applies_to: default_applies_to(),
        }
    }

    fn validate(&self, errors: &mut Vec<String>) {
        let name = &self.name;
        if name.is_empty() {
            errors.push("strategies: name must not be empty".to_string());
        }
        if self.timeout_secs == 0 {
            errors.push(format!("strategies.{name}: timeout_secs must be > 0"));
        }
        if self.max_attempts_per_incident == 0 {
            errors.push(format!("strategies.{name}: max_attempts_per_incident must be >= 1"));
        }
        if self.applies_to.is_empty() {
            errors.push(format!("strategies.{name}: applies_to must list at least one trigger"));
        }
        if self.action == ActionKind::Command && self.command.is_none() {
            errors.push(format!("strategies.{name}: action \"command\" requires a command"));
        }
    }
}

/// Stock catalogue, cheapest first.
pub fn default_strategies() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig::builtin(ActionKind::QuickRestart, 1, defaults::QUICK_RESTART_TIMEOUT_SECS),
        StrategyConfig::builtin(ActionKind::SafeMode, 2, defaults::SAFE_MODE_TIMEOUT_SECS),
        StrategyConfig::builtin(ActionKind::ConfigRollback, 3, defaults::CONFIG_ROLLBACK_TIMEOUT_SECS),
        StrategyConfig::builtin(ActionKind::DependencyRestart, 4, defaults::DEPENDENCY_RESTART_TIMEOUT_SECS),
        StrategyConfig::builtin(ActionKind::BackupRestore, 5, defaults::BACKUP_RESTORE_TIMEOUT_SECS),
        StrategyConfig::builtin(ActionKind::FullBootstrap, 6, defaults::FULL_BOOTSTRAP_TIMEOUT_SECS),
    ]
}

// ============================================================================
// Escalation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::Log, ChannelConfig::FileDrop { dir: None }]
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { channels: default_channels() }
    }
}

/// A notification backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Error-level tracing event
    Log,
    /// One JSON file per escalation. Defaults to `<data_dir>/notifications`.
    FileDrop {
        #[serde(default)]
        dir: Option<PathBuf>,
    },
    /// HTTP POST of the escalation record
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout() -> u64 {
    defaults::WEBHOOK_TIMEOUT_SECS
}

impl ChannelConfig {
    fn validate(&self, errors: &mut Vec<String>) {
        if let ChannelConfig::Webhook { url, timeout_secs } = self {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("escalation.channels: webhook url '{url}' must be http(s)"));
            }
            if *timeout_secs == 0 {
                errors.push("escalation.channels: webhook timeout_secs must be > 0".to_string());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: WardenConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.watchdog.poll_interval_secs, 10);
        assert_eq!(config.watchdog.confirmation_polls, 2);
        assert_eq!(config.watchdog.global_restart_cap, 5);
        assert_eq!(config.strategies.len(), 6);
        assert_eq!(config.strategies[0].name, "quick_restart");
        assert_eq!(config.strategies[5].timeout_secs, 7_200);
        assert_eq!(config.escalation.channels.len(), 2);
        assert!(config.processes.is_empty());
    }

    #[test]
    fn test_process_defaults() {
        let toml_str = r#"
[[processes]]
id = "launcher"
program = "/opt/app/launcher"
args = ["--port", "9000"]
"#;
        let config = WardenConfig::from_toml_str(toml_str).expect("should parse");
        let p = config.process("launcher").unwrap();
        assert_eq!(p.staleness_threshold(), Duration::from_secs(90));
        assert_eq!(p.emit_interval(), Duration::from_secs(20));
        assert_eq!(p.safe_mode_args, vec!["--safe-mode"]);
        assert_eq!(p.bootstrap.program, "emergency-bootstrap");
        assert_eq!(
            p.heartbeat_file(Path::new("/var/lib/warden")),
            PathBuf::from("/var/lib/warden/heartbeats/launcher.json")
        );
    }

    #[test]
    fn test_custom_strategy_table() {
        let toml_str = r#"
[[strategies]]
name = "quick_restart"
action = "quick_restart"
priority = 10
timeout_secs = 15

[[strategies]]
name = "flush_cache"
action = "command"
priority = 20
timeout_secs = 60
max_attempts_per_incident = 2
applies_to = ["stale_heartbeat"]
command = { program = "redis-cli", args = ["FLUSHALL"] }
"#;
        let config = WardenConfig::from_toml_str(toml_str).expect("should parse");
        assert_eq!(config.strategies.len(), 2);
        let flush = &config.strategies[1];
        assert_eq!(flush.action, ActionKind::Command);
        assert_eq!(flush.applies_to, vec![Trigger::StaleHeartbeat]);
        assert_eq!(flush.command.as_ref().unwrap().args, vec!["FLUSHALL"]);
    }

    #[test]
    fn test_validation_catches_duplicate_priorities() {
        let mut config = WardenConfig::default();
        config.strategies[1].priority = 1;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("priority 1")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = WardenConfig::default();
        config.watchdog.poll_interval_secs = 0;
        let mut p = ProcessConfig::new("launcher", "launcher");
        p.staleness_threshold_secs = 20;
        config.processes.push(p.clone());
        config.processes.push(p);
        config.strategies.push(StrategyConfig {
            command: None,
            ..StrategyConfig::builtin(ActionKind::Command, 99, 10)
        });

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert!(errors.iter().any(|e| e.contains("poll_interval_secs")));
        assert!(errors.iter().any(|e| e.contains("staleness_threshold_secs")));
        assert!(errors.iter().any(|e| e.contains("duplicate id")));
        assert!(errors.iter().any(|e| e.contains("requires a command")));
    }

    #[test]
    fn test_bad_process_id_rejected() {
        let mut config = WardenConfig::default();
        config.processes.push(ProcessConfig::new("../etc", "launcher"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_escalation_channels_parse() {
        let toml_str = r#"
[escalation]
channels = [
  { type = "log" },
  { type = "webhook", url = "https://hooks.example.com/oncall" },
  { type = "file_drop", dir = "/var/spool/warden" },
]
"#;
        let config = WardenConfig::from_toml_str(toml_str).expect("should parse");
        assert_eq!(config.escalation.channels.len(), 3);
        assert_eq!(
            config.escalation.channels[1],
            ChannelConfig::Webhook { url: "https://hooks.example.com/oncall".into(), timeout_secs: 10 }
        );
    }

    #[test]
    fn test_webhook_url_validated() {
        let toml_str = r#"
[escalation]
channels = [{ type = "webhook", url = "ftp://nope" }]
"#;
        assert!(matches!(
            WardenConfig::from_toml_str(toml_str),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let err = WardenConfig::load_from_file(Path::new("/nonexistent/warden.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
