//! Emergency Bootstrap Phase Tests
//!
//! Runs the real phases against a scratch directory with `sh` standing in
//! for installers and services.

use std::path::Path;

use tokio_test::{assert_err, assert_ok};
use warden::bootstrap::{BootstrapManifest, EmergencyBootstrap, ModuleSpec, Phase, ServiceSpec};
use warden::storage::ProcessLock;
use warden::types::CommandSpec;

fn sh(script: String) -> CommandSpec {
    CommandSpec::new("sh", ["-c".to_string(), script])
}

fn manifest(root: &Path) -> BootstrapManifest {
    BootstrapManifest {
        report_dir: root.join("reports"),
        lock_dir: Some(root.to_path_buf()),
        min_free_disk_mb: 0,
        disk_path: root.to_path_buf(),
        directories: vec![root.join("data"), root.join("data/inbox")],
        files: Vec::new(),
        modules: Vec::new(),
        services: Vec::new(),
        install_timeout_secs: 10,
        probe_timeout_secs: 5,
    }
}

fn marker_module(root: &Path, install: CommandSpec) -> ModuleSpec {
    let marker = root.join("module.installed");
    ModuleSpec {
        name: "agent-sdk".to_string(),
        probe: Some(sh(format!("test -f {}", marker.display()))),
        path: None,
        install,
    }
}

/// Service whose start command writes its own pid into `lock`, then idles
fn lock_writing_service(name: &str, lock: &Path, order: u32) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        match_pattern: None,
        lock_file: Some(lock.to_path_buf()),
        start: sh(format!("echo $$ > {}; exec sleep 30", lock.display())),
        order,
        critical: true,
        startup_wait_secs: 1,
    }
}

fn kill_holder(lock: &Path) {
    if let Some(pid) = ProcessLock::holder_of(lock) {
        let _ = warden::sys::send_signal(pid, libc::SIGKILL);
    }
}

#[tokio::test]
async fn full_run_repairs_directories_and_modules() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut m = manifest(root);
    m.modules = vec![marker_module(root, sh(format!("touch {}", root.join("module.installed").display())))];

    let report = EmergencyBootstrap::new(m).run(&Phase::ALL).await.unwrap();

    let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![Phase::Diagnose, Phase::Repair, Phase::Recover, Phase::Verify]);
    assert_eq!(report.issues_found, 3, "two directories and one module");
    assert_eq!(report.fixes_applied, 3);
    assert!(report.success, "next steps: {:?}", report.next_steps);
    assert!(!report.fatal);
    assert!(root.join("data/inbox").is_dir());
    assert!(root.join("module.installed").exists());
}

#[tokio::test]
async fn failed_install_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut m = manifest(root);
    m.modules = vec![marker_module(root, CommandSpec::new("false", Vec::<String>::new()))];

    let report = EmergencyBootstrap::new(m).run(&Phase::ALL).await.unwrap();

    assert!(!report.success);
    assert!(!report.fatal);
    assert!(report.next_steps.iter().any(|s| s.contains("install module agent-sdk failed")), "{:?}", report.next_steps);
}

#[tokio::test]
async fn critical_service_that_will_not_start_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut m = manifest(root);
    std::fs::create_dir_all(root.join("data/inbox")).unwrap();
    m.services = vec![ServiceSpec {
        name: "warden".to_string(),
        match_pattern: None,
        lock_file: Some(root.join(".warden.lock")),
        start: CommandSpec::new("true", Vec::<String>::new()),
        order: 0,
        critical: true,
        startup_wait_secs: 0,
    }];

    let report = EmergencyBootstrap::new(m).run(&Phase::ALL).await.unwrap();

    assert!(report.fatal);
    assert!(!report.success);
    assert!(report.next_steps.iter().any(|s| s.contains("manual intervention")));
}

#[tokio::test]
async fn services_start_in_manifest_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let watchdog_lock = root.join("watchdog.lock");
    let launcher_lock = root.join("launcher.lock");
    let mut m = manifest(root);
    m.services = vec![
        lock_writing_service("launcher", &launcher_lock, 2),
        lock_writing_service("warden", &watchdog_lock, 1),
    ];

    let report = EmergencyBootstrap::new(m).run(&Phase::ALL).await.unwrap();
    kill_holder(&watchdog_lock);
    kill_holder(&launcher_lock);

    let recover = report.phases.iter().find(|p| p.phase == Phase::Recover).unwrap();
    let started: Vec<&str> = recover.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(started, vec!["start service warden", "start service launcher"]);
    assert!(recover.passed, "{:?}", recover.actions);
    assert!(report.success, "{:?}", report.next_steps);
}

#[tokio::test]
async fn running_service_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("data/inbox")).unwrap();
    let lock = root.join(".warden.lock");
    std::fs::write(&lock, format!("{}\n", std::process::id())).unwrap();

    let mut m = manifest(root);
    m.services = vec![ServiceSpec {
        name: "warden".to_string(),
        match_pattern: None,
        lock_file: Some(lock),
        start: CommandSpec::new("false", Vec::<String>::new()),
        order: 0,
        critical: true,
        startup_wait_secs: 0,
    }];

    let report = EmergencyBootstrap::new(m).run(&[Phase::Recover]).await.unwrap();
    assert_eq!(report.phases.len(), 2, "standalone recover diagnoses first");
    assert!(report.phases[1].actions.is_empty());
    assert!(report.success);
}

#[tokio::test]
async fn standalone_repair_diagnoses_first() {
    let dir = tempfile::tempdir().unwrap();
    let report = EmergencyBootstrap::new(manifest(dir.path())).run(&[Phase::Repair]).await.unwrap();

    let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![Phase::Diagnose, Phase::Repair]);
    assert_eq!(report.fixes_applied, 2);
    assert!(dir.path().join("data/inbox").is_dir());
}

#[tokio::test]
async fn recover_after_diagnose_does_not_diagnose_again() {
    let dir = tempfile::tempdir().unwrap();
    let report = EmergencyBootstrap::new(manifest(dir.path()))
        .run(&[Phase::Diagnose, Phase::Recover])
        .await
        .unwrap();

    let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, vec![Phase::Diagnose, Phase::Recover]);
}

#[tokio::test]
async fn mutating_phases_need_the_bootstrap_lock() {
    let dir = tempfile::tempdir().unwrap();
    let _held = ProcessLock::acquire(dir.path(), ProcessLock::BOOTSTRAP).unwrap();
    let bootstrap = EmergencyBootstrap::new(manifest(dir.path()));

    assert_err!(bootstrap.run(&[Phase::Repair]).await);

    let diagnosis = assert_ok!(bootstrap.run(&[Phase::Diagnose]).await);
    assert_eq!(diagnosis.issues_found, 2);
    assert!(!dir.path().join("data").exists(), "diagnose never mutates");
}

#[tokio::test]
async fn report_artifact_is_json() {
    let dir = tempfile::tempdir().unwrap();
    let m = manifest(dir.path());
    let report_dir = m.report_dir.clone();
    let report = EmergencyBootstrap::new(m).run(&[Phase::Diagnose]).await.unwrap();

    let path = report.write_to(&report_dir).unwrap();
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(raw["phases"][0]["phase"], "diagnose");
    assert_eq!(raw["phases"][0]["checks"][0]["kind"], "directory");
    assert_eq!(raw["success"], false);
}
