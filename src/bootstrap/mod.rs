//! Emergency Bootstrap
//!
//! Last-resort recovery that runs when the watchdog itself cannot. Kept
//! independent of the watchdog, incident and recovery modules: it only needs
//! the manifest, the filesystem and the process table.
//!
//! ## Phases
//!
//! 1. **Diagnose**: directories, required files, modules, free disk, services
//! 2. **Repair**: recreate directories, reinstall missing modules
//! 3. **Recover**: start stopped services in manifest order
//! 4. **Verify**: diagnose again
//!
//! `repair` and `recover` run a fresh diagnosis first, so any phase can be
//! run on its own. Mutating phases hold `.bootstrap.lock`.

pub mod manifest;

pub use manifest::{BootstrapManifest, ModuleSpec, ServiceSpec};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::storage::{self, ProcessLock};
use crate::sys;
use crate::types::CommandSpec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Diagnose,
    Repair,
    Recover,
    Verify,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Diagnose, Phase::Repair, Phase::Recover, Phase::Verify];

    fn mutates(self) -> bool {
        matches!(self, Phase::Repair | Phase::Recover)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Diagnose => write!(f, "diagnose"),
            Phase::Repair => write!(f, "repair"),
            Phase::Recover => write!(f, "recover"),
            Phase::Verify => write!(f, "verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Directory,
    File,
    Module,
    DiskSpace,
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub kind: CheckKind,
    pub passed: bool,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl CheckResult {
    fn pass(kind: CheckKind, name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { name: name.into(), kind, passed: true, detail: detail.into(), remediation: None }
    }

    fn fail(kind: CheckKind, name: impl Into<String>, detail: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            passed: false,
            detail: detail.into(),
            remediation: Some(remediation.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResult {
    pub name: String,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passed: bool,
    #[serde(default)]
    pub checks: Vec<CheckResult>,
    #[serde(default)]
    pub actions: Vec<ActionResult>,
}

impl PhaseReport {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseReport>,
    pub issues_found: usize,
    pub fixes_applied: usize,
    pub next_steps: Vec<String>,
    pub success: bool,
    /// The watchdog could not be brought back; manual intervention required
    pub fatal: bool,
}

impl BootstrapReport {
    /// Write `bootstrap_report_<timestamp>.json` under `dir`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, storage::StorageError> {
        let path = dir.join(format!("bootstrap_report_{}.json", self.started_at.format("%Y%m%d_%H%M%S")));
        storage::write_json_atomic(&path, self)?;
        Ok(path)
    }
}

pub struct EmergencyBootstrap {
    manifest: BootstrapManifest,
    proc_root: PathBuf,
}

impl EmergencyBootstrap {
    pub fn new(manifest: BootstrapManifest) -> Self {
        Self { manifest, proc_root: PathBuf::from(sys::PROC_ROOT) }
    }

    pub fn manifest(&self) -> &BootstrapManifest {
        &self.manifest
    }

    // ========================================================================
    // Phases
    // ========================================================================

    pub async fn diagnose(&self) -> PhaseReport {
        self.inspect(Phase::Diagnose).await
    }

    pub async fn verify(&self) -> PhaseReport {
        self.inspect(Phase::Verify).await
    }

    async fn inspect(&self, phase: Phase) -> PhaseReport {
        let started_at = Utc::now();
        let mut checks = Vec::new();

        for dir in &self.manifest.directories {
            let name = dir.display().to_string();
            checks.push(if dir.is_dir() {
                CheckResult::pass(CheckKind::Directory, name, "present")
            } else {
                CheckResult::fail(CheckKind::Directory, name, "missing", "recreated by repair")
            });
        }

        for file in &self.manifest.files {
            let name = file.display().to_string();
            checks.push(if file.is_file() {
                CheckResult::pass(CheckKind::File, name, "present")
            } else {
                CheckResult::fail(
                    CheckKind::File,
                    name.clone(),
                    "missing",
                    format!("restore {name} from version control or backup; not auto-repairable"),
                )
            });
        }

        for module in &self.manifest.modules {
            checks.push(match self.module_present(module).await {
                Ok(()) => CheckResult::pass(CheckKind::Module, &module.name, "present"),
                Err(detail) => CheckResult::fail(
                    CheckKind::Module,
                    &module.name,
                    detail,
                    format!("reinstalled by repair: {}", module.install),
                ),
            });
        }

        checks.push(self.check_disk());

        for service in self.manifest.services_in_order() {
            checks.push(match self.service_pid(service) {
                Some(pid) => CheckResult::pass(CheckKind::Service, &service.name, format!("running (pid {pid})")),
                None => CheckResult::fail(
                    CheckKind::Service,
                    &service.name,
                    "not running",
                    format!("started by recover: {}", service.start),
                ),
            });
        }

        let passed = checks.iter().all(|c| c.passed);
        let failed = checks.iter().filter(|c| !c.passed).count();
        info!(phase = %phase, checks = checks.len(), failed, "🔍 Inspection complete");

        PhaseReport { phase, started_at, finished_at: Utc::now(), passed, checks, actions: Vec::new() }
    }

    /// Fix what a diagnosis found and can be fixed automatically
    pub async fn repair(&self, diagnosis: &PhaseReport) -> PhaseReport {
        let started_at = Utc::now();
        let mut actions = Vec::new();

        for check in diagnosis.failed_checks() {
            match check.kind {
                CheckKind::Directory => {
                    let result = std::fs::create_dir_all(&check.name);
                    actions.push(ActionResult {
                        name: format!("create directory {}", check.name),
                        success: result.is_ok(),
                        detail: result.map_or_else(|e| e.to_string(), |()| "created".to_string()),
                    });
                }
                CheckKind::Module => {
                    let Some(module) = self.manifest.modules.iter().find(|m| m.name == check.name) else {
                        continue;
                    };
                    info!(module = %module.name, command = %module.install, "📦 Reinstalling module");
                    let result = run_to_completion(&module.install, self.manifest.install_timeout()).await;
                    let result = match result {
                        Ok(()) => self.module_present(module).await.map_err(|d| format!("installed but {d}")),
                        Err(e) => Err(e),
                    };
                    actions.push(ActionResult {
                        name: format!("install module {}", module.name),
                        success: result.is_ok(),
                        detail: result.map_or_else(|e| e, |()| "installed".to_string()),
                    });
                }
                CheckKind::File | CheckKind::DiskSpace | CheckKind::Service => {}
            }
        }

        let passed = actions.iter().all(|a| a.success);
        PhaseReport {
            phase: Phase::Repair,
            started_at,
            finished_at: Utc::now(),
            passed,
            checks: Vec::new(),
            actions,
        }
    }

    /// Start stopped services in order. Returns the report and whether a
    /// critical service could not be brought back.
    pub async fn recover(&self) -> (PhaseReport, bool) {
        let started_at = Utc::now();
        let mut actions = Vec::new();
        let mut fatal = false;

        for service in self.manifest.services_in_order() {
            if self.service_pid(service).is_some() {
                continue;
            }

            info!(service = %service.name, command = %service.start, "▶️ Starting service");
            let result = match spawn_detached(&service.start) {
                Ok(pid) => {
                    tokio::time::sleep(Duration::from_secs(service.startup_wait_secs)).await;
                    match self.service_pid(service) {
                        Some(running) => Ok(format!("started (pid {running})")),
                        None => Err(format!("launched as pid {pid} but not running after {}s", service.startup_wait_secs)),
                    }
                }
                Err(e) => Err(e),
            };

            if let Err(detail) = &result {
                if service.critical {
                    error!(service = %service.name, %detail, "Critical service could not be started");
                    fatal = true;
                } else {
                    warn!(service = %service.name, %detail, "Service could not be started");
                }
            }
            actions.push(ActionResult {
                name: format!("start service {}", service.name),
                success: result.is_ok(),
                detail: result.unwrap_or_else(|e| e),
            });
        }

        let passed = actions.iter().all(|a| a.success);
        let report = PhaseReport {
            phase: Phase::Recover,
            started_at,
            finished_at: Utc::now(),
            passed,
            checks: Vec::new(),
            actions,
        };
        (report, fatal)
    }

    /// Run the requested phases in order
    pub async fn run(&self, phases: &[Phase]) -> Result<BootstrapReport> {
        let started_at = Utc::now();
        info!("🚑 Emergency bootstrap starting: phases {:?}", phases);

        let _lock = if phases.iter().any(|p| p.mutates()) {
            let lock_dir = self.manifest.lock_dir();
            let lock = ProcessLock::acquire(&lock_dir, ProcessLock::BOOTSTRAP)
                .context("Another bootstrap is mutating this installation")?;
            if let Some(pid) = ProcessLock::holder(&lock_dir, ProcessLock::WATCHDOG) {
                info!(watchdog_pid = pid, "Watchdog is running, its recoveries wait for this bootstrap");
            }
            Some(lock)
        } else {
            None
        };

        let mut reports: Vec<PhaseReport> = Vec::new();
        let mut diagnosis: Option<PhaseReport> = None;
        let mut fatal = false;

        for &phase in phases {
            match phase {
                Phase::Diagnose => {
                    let report = self.diagnose().await;
                    diagnosis = Some(report.clone());
                    reports.push(report);
                }
                Phase::Repair => {
                    let current = match diagnosis.take() {
                        Some(d) => d,
                        None => {
                            let d = self.diagnose().await;
                            reports.push(d.clone());
                            d
                        }
                    };
                    reports.push(self.repair(&current).await);
                }
                Phase::Recover => {
                    if reports.is_empty() {
                        reports.push(self.diagnose().await);
                    }
                    let (report, was_fatal) = self.recover().await;
                    fatal |= was_fatal;
                    reports.push(report);
                }
                Phase::Verify => reports.push(self.verify().await),
            }
        }

        let issues_found = reports
            .iter()
            .find(|r| r.phase == Phase::Diagnose)
            .map_or(0, |r| r.failed_checks().count());
        let fixes_applied = reports
            .iter()
            .flat_map(|r| r.actions.iter())
            .filter(|a| a.success)
            .count();

        let last_inspection = reports.iter().rev().find(|r| matches!(r.phase, Phase::Diagnose | Phase::Verify));
        let mut next_steps: Vec<String> = last_inspection
            .map(|r| r.failed_checks().filter_map(|c| c.remediation.clone()).collect())
            .unwrap_or_default();
        for report in &reports {
            for action in report.actions.iter().filter(|a| !a.success) {
                next_steps.push(format!("{} failed: {}", action.name, action.detail));
            }
        }
        if fatal {
            next_steps.push("Watchdog could not be restarted: manual intervention required".to_string());
        }

        let success = !fatal && reports.last().is_some_and(|r| r.passed);
        let report = BootstrapReport {
            started_at,
            finished_at: Utc::now(),
            phases: reports,
            issues_found,
            fixes_applied,
            next_steps,
            success,
            fatal,
        };

        if report.success {
            info!(issues = issues_found, fixes = fixes_applied, "✅ Emergency bootstrap finished");
        } else {
            warn!(
                issues = issues_found,
                fixes = fixes_applied,
                fatal,
                "Emergency bootstrap finished with failures"
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Probes
    // ========================================================================

    async fn module_present(&self, module: &ModuleSpec) -> Result<(), String> {
        if let Some(path) = &module.path {
            if !path.exists() {
                return Err(format!("{} missing", path.display()));
            }
        }
        if let Some(probe) = &module.probe {
            run_to_completion(probe, self.manifest.probe_timeout())
                .await
                .map_err(|e| format!("probe failed: {e}"))?;
        }
        Ok(())
    }

    fn check_disk(&self) -> CheckResult {
        let path = &self.manifest.disk_path;
        // Fall back to the nearest existing ancestor; the data dir may be missing
        let probe_path = path.ancestors().find(|p| p.exists()).unwrap_or(Path::new("/"));
        let min = self.manifest.min_free_disk_mb;
        match sys::disk_free(probe_path) {
            Ok(bytes) => {
                let free_mb = bytes / (1024 * 1024);
                if free_mb >= min {
                    CheckResult::pass(CheckKind::DiskSpace, path.display().to_string(), format!("{free_mb} MB free"))
                } else {
                    CheckResult::fail(
                        CheckKind::DiskSpace,
                        path.display().to_string(),
                        format!("{free_mb} MB free, need {min} MB"),
                        "free disk space; not auto-repairable",
                    )
                }
            }
            Err(e) => CheckResult::fail(
                CheckKind::DiskSpace,
                path.display().to_string(),
                format!("statvfs failed: {e}"),
                "check the filesystem manually",
            ),
        }
    }

    fn service_pid(&self, service: &ServiceSpec) -> Option<u32> {
        if let Some(lock) = &service.lock_file {
            if let Some(pid) = ProcessLock::holder_of(lock) {
                return Some(pid);
            }
        }
        let pattern = service.match_pattern.as_deref()?;
        sys::find_processes(&self.proc_root, pattern).ok()?.into_iter().next()
    }
}

/// Run a command under a hard timeout; the child is killed if it expires
async fn run_to_completion(spec: &CommandSpec, timeout: Duration) -> Result<(), String> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| format!("'{}' could not be spawned: {e}", spec.program))?;
    let mut group = sys::GroupKillGuard::new(child.id());
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            group.disarm();
            if status.success() {
                Ok(())
            } else {
                Err(format!("'{spec}' exited with {status}"))
            }
        }
        Ok(Err(e)) => Err(format!("'{}' could not be waited on: {e}", spec.program)),
        Err(_) => Err(format!("'{spec}' timed out after {}s", timeout.as_secs())),
    }
}

/// Start a long-running service in its own process group and leave it running
fn spawn_detached(spec: &CommandSpec) -> Result<u32, String> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    let child = cmd.spawn().map_err(|e| format!("'{}' could not be spawned: {e}", spec.program))?;
    child.id().ok_or_else(|| format!("'{}' exited immediately", spec.program))
}
