//! Strategy actions: what each remediation step actually does to the host
//!
//! The Recovery Agent only sees [`StrategyAction`]. The built-in catalogue is
//! [`BuiltinAction`], which drives processes through a [`LauncherControl`]
//! (the OS implementation is [`OsLauncher`]; tests substitute fakes).

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::strategy::Strategy;
use crate::config::{defaults, ProcessConfig};
use crate::sys;
use crate::types::{ActionKind, CommandSpec, Incident};

/// Poll step while waiting for a terminated process to go away
const TERMINATE_POLL: Duration = Duration::from_millis(200);
/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed { command: String, status: String, stderr: String },
    #[error("could not signal pid {pid}: {source}")]
    Signal { pid: u32, source: io::Error },
    #[error("pid {0} survived SIGKILL")]
    Unkillable(u32),
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("missing prerequisite: {0}")]
    Prerequisite(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Everything an action may look at
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub incident: &'a Incident,
    pub target: &'a ProcessConfig,
    pub strategy: &'a Strategy,
    /// Last known pid of the supervised process
    pub pid: Option<u32>,
}

impl ActionContext<'_> {
    fn pid_string(&self) -> String {
        self.pid.map(|p| p.to_string()).unwrap_or_default()
    }
}

/// What an action did, when it completed its own steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// Pid of a freshly launched instance
    pub relaunched_pid: Option<u32>,
}

/// One remediation step. Executed under an external hard timeout; dropping
/// the future must stop any work it started.
#[async_trait]
pub trait StrategyAction: Send + Sync {
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ActionReport, StrategyError>;
}

/// Process control primitives used by the built-in strategies
#[async_trait]
pub trait LauncherControl: Send + Sync {
    /// SIGTERM, wait up to `grace`, then SIGKILL
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), StrategyError>;
    /// Start a detached instance and return its pid
    async fn launch(&self, target: &ProcessConfig, safe_mode: bool) -> Result<u32, StrategyError>;
    /// Run a command to completion; nonzero exit is an error
    async fn run_command(&self, spec: &CommandSpec, vars: &[(&str, &str)]) -> Result<(), StrategyError>;
}

// ============================================================================
// OS launcher
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OsLauncher;

impl OsLauncher {
    fn still_running(pid: u32) -> bool {
        sys::pid_alive(pid)
            && !matches!(sys::process_state(Path::new(sys::PROC_ROOT), pid), Ok('Z' | 'X'))
    }

    async fn wait_gone(pid: u32, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while Self::still_running(pid) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }
        true
    }
}

#[async_trait]
impl LauncherControl for OsLauncher {
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), StrategyError> {
        if !Self::still_running(pid) {
            debug!(pid, "Process already gone, nothing to terminate");
            return Ok(());
        }

        sys::send_signal(pid, libc::SIGTERM).map_err(|source| StrategyError::Signal { pid, source })?;
        if Self::wait_gone(pid, grace).await {
            info!(pid, "Process exited after SIGTERM");
            return Ok(());
        }

        warn!(pid, grace_secs = grace.as_secs(), "Process ignored SIGTERM, sending SIGKILL");
        sys::send_signal(pid, libc::SIGKILL).map_err(|source| StrategyError::Signal { pid, source })?;
        if Self::wait_gone(pid, Duration::from_secs(defaults::TERMINATE_GRACE_SECS)).await {
            Ok(())
        } else {
            Err(StrategyError::Unkillable(pid))
        }
    }

    async fn launch(&self, target: &ProcessConfig, safe_mode: bool) -> Result<u32, StrategyError> {
        let mut cmd = Command::new(&target.program);
        cmd.args(&target.args)
            .envs(&target.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        if safe_mode {
            cmd.args(&target.safe_mode_args).env(defaults::SAFE_MODE_ENV, "1");
        }
        if let Some(dir) = &target.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| StrategyError::Spawn {
            program: target.program.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| StrategyError::Spawn {
            program: target.program.clone(),
            source: io::Error::new(io::ErrorKind::Other, "child exited before its pid was read"),
        })?;
        // Dropping the handle detaches the child; tokio reaps it on exit
        drop(child);

        if let Some(pid_file) = &target.pid_file {
            tokio::fs::write(pid_file, format!("{pid}\n"))
                .await
                .map_err(|source| StrategyError::Io { path: pid_file.clone(), source })?;
        }

        info!(process = %target.id, pid, safe_mode, "🚀 Launched process");
        Ok(pid)
    }

    async fn run_command(&self, spec: &CommandSpec, vars: &[(&str, &str)]) -> Result<(), StrategyError> {
        let args = spec.render_args(vars);
        let mut cmd = Command::new(&spec.program);
        cmd.args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        debug!(program = %spec.program, ?args, "Running command");
        let spawn_err = |source| StrategyError::Spawn { program: spec.program.clone(), source };
        let child = cmd.spawn().map_err(spawn_err)?;
        // A timeout drops this future; the guard then takes down grandchildren too
        let mut group = sys::GroupKillGuard::new(child.id());
        let output = child.wait_with_output().await.map_err(spawn_err)?;
        group.disarm();

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let excerpt: String = stderr
            .char_indices()
            .nth(STDERR_EXCERPT)
            .map_or(stderr, |(i, _)| &stderr[..i])
            .to_string();
        Err(StrategyError::CommandFailed {
            command: spec.to_string(),
            status: output.status.to_string(),
            stderr: excerpt,
        })
    }
}

// ============================================================================
// Built-in catalogue
// ============================================================================

/// Dispatches on [`ActionKind`]
pub struct BuiltinAction {
    launcher: Arc<dyn LauncherControl>,
}

impl BuiltinAction {
    pub fn new(launcher: Arc<dyn LauncherControl>) -> Self {
        Self { launcher }
    }

    pub fn os() -> Self {
        Self::new(Arc::new(OsLauncher))
    }

    async fn terminate(&self, ctx: &ActionContext<'_>) -> Result<(), StrategyError> {
        match ctx.pid {
            Some(pid) => self.launcher.terminate(pid, ctx.target.terminate_grace()).await,
            None => Ok(()),
        }
    }

    async fn restart(&self, ctx: &ActionContext<'_>, safe_mode: bool) -> Result<ActionReport, StrategyError> {
        self.terminate(ctx).await?;
        let pid = self.launcher.launch(ctx.target, safe_mode).await?;
        Ok(ActionReport { relaunched_pid: Some(pid) })
    }
}

#[async_trait]
impl StrategyAction for BuiltinAction {
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ActionReport, StrategyError> {
        let pid = ctx.pid_string();
        let vars = [
            ("process_id", ctx.target.id.as_str()),
            ("incident_id", ctx.incident.incident_id.as_str()),
            ("pid", pid.as_str()),
        ];

        match ctx.strategy.action {
            ActionKind::QuickRestart => self.restart(ctx, false).await,
            ActionKind::SafeMode => self.restart(ctx, true).await,
            ActionKind::ConfigRollback => {
                let rollback = ctx
                    .target
                    .rollback
                    .as_ref()
                    .ok_or_else(|| StrategyError::Prerequisite("no rollback configured".into()))?;
                let snapshot = newest_entry(&rollback.snapshot_dir)?;
                self.terminate(ctx).await?;
                restore_file(&snapshot, &rollback.config_path)?;
                info!(
                    process = %ctx.target.id,
                    snapshot = %snapshot.display(),
                    "⏪ Config rolled back to last snapshot"
                );
                let pid = self.launcher.launch(ctx.target, false).await?;
                Ok(ActionReport { relaunched_pid: Some(pid) })
            }
            ActionKind::DependencyRestart => {
                if ctx.target.dependencies.is_empty() {
                    return Err(StrategyError::Prerequisite("no dependencies declared".into()));
                }
                for dep in &ctx.target.dependencies {
                    info!(process = %ctx.target.id, dependency = %dep, "Restarting dependency");
                    self.launcher.run_command(dep, &vars).await?;
                }
                self.restart(ctx, false).await
            }
            ActionKind::BackupRestore => {
                let restore = ctx
                    .target
                    .restore
                    .as_ref()
                    .ok_or_else(|| StrategyError::Prerequisite("no backup restore configured".into()))?;
                let backup = newest_entry(&restore.backup_dir)?;
                let backup_str = backup.to_string_lossy().into_owned();
                self.terminate(ctx).await?;
                let mut with_backup = vars.to_vec();
                with_backup.push(("backup", backup_str.as_str()));
                self.launcher.run_command(&restore.command, &with_backup).await?;
                info!(process = %ctx.target.id, backup = %backup_str, "📦 State restored from backup");
                let pid = self.launcher.launch(ctx.target, false).await?;
                Ok(ActionReport { relaunched_pid: Some(pid) })
            }
            ActionKind::FullBootstrap => {
                self.terminate(ctx).await?;
                self.launcher.run_command(&ctx.target.bootstrap, &vars).await?;
                let pid = self.launcher.launch(ctx.target, false).await?;
                Ok(ActionReport { relaunched_pid: Some(pid) })
            }
            ActionKind::Command => {
                let spec = ctx
                    .strategy
                    .command
                    .as_ref()
                    .ok_or_else(|| StrategyError::Prerequisite("strategy has no command".into()))?;
                self.launcher.run_command(spec, &vars).await?;
                Ok(ActionReport::default())
            }
        }
    }
}

/// Most recently modified visible entry of `dir` (name breaks ties)
fn newest_entry(dir: &Path) -> Result<PathBuf, StrategyError> {
    let io_err = |source| StrategyError::Io { path: dir.to_path_buf(), source };
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified()).map_err(io_err)?;
        let candidate = (modified, entry.path());
        if newest.as_ref().map_or(true, |best| candidate > *best) {
            newest = Some(candidate);
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| StrategyError::Prerequisite(format!("{} is empty", dir.display())))
}

/// Copy `from` over `to` via a temp file and rename
fn restore_file(from: &Path, to: &Path) -> Result<(), StrategyError> {
    let tmp = to.with_extension(format!("restore.{}.tmp", std::process::id()));
    fs::copy(from, &tmp).map_err(|source| StrategyError::Io { path: tmp.clone(), source })?;
    fs::rename(&tmp, to).map_err(|source| StrategyError::Io { path: to.to_path_buf(), source })
}
