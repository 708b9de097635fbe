//! Warden - Autonomous Process Recovery
//!
//! Watches supervised processes through their heartbeat files, opens an
//! incident when one stops beating, and works through the remediation table
//! until it recovers or a human has to step in.
//!
//! # Usage
//!
//! ```bash
//! # Run the watchdog (foreground)
//! warden start
//!
//! # Inspect state; exit code 0 healthy, 1 incident open, 2 awaiting a human
//! warden status
//! warden status --json
//!
//! # Acknowledge an escalation so recovery can resume
//! warden ack INC-20240501-120000-launcher-1 --by alice
//!
//! # Heartbeat from a shell wrapper around the supervised process
//! warden beat launcher
//! ```
//!
//! # Environment Variables
//!
//! - `WARDEN_CONFIG`: Path to `warden.toml` (default: `./warden.toml`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warden::config::WardenConfig;
use warden::escalation::EscalationGateway;
use warden::heartbeat::HeartbeatEmitter;
use warden::incident::{IncidentIndex, IncidentManager};
use warden::monitor::ProcfsProbe;
use warden::recovery::BuiltinAction;
use warden::storage::ProcessLock;
use warden::sys;
use warden::watchdog::{ControlInbox, ControlRequest, StatusReport, StatusSnapshot, Watchdog};

/// Bad arguments, unreadable config, or a command that could not run
const EXIT_INVOCATION_ERROR: u8 = 3;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Autonomous process recovery watchdog")]
#[command(version)]
struct CliArgs {
    /// Path to warden.toml. Errors loading an explicit file are fatal.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "WARDEN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the watchdog in the foreground until SIGINT/SIGTERM
    Start,

    /// Signal the running watchdog to shut down
    Stop {
        /// Seconds to wait for it to exit
        #[arg(long, default_value = "15")]
        wait_secs: u64,
    },

    /// Show supervised processes and open incidents
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Acknowledge an escalated incident
    Ack {
        incident_id: String,
        /// Who is acknowledging
        #[arg(long)]
        by: Option<String>,
    },

    /// Ask the running watchdog to start recovery for a process now
    Recover { process_id: String },

    /// Write heartbeats for a process until interrupted
    Beat {
        process_id: String,
        /// Write the graceful-shutdown marker once and exit
        #[arg(long)]
        shutdown: bool,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_INVOCATION_ERROR } else { 0 };
            if let Err(print_err) = e.print() {
                eprintln!("warden: could not print usage: {print_err}");
            }
            return ExitCode::from(code);
        }
    };

    init_tracing(args.log_json);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_INVOCATION_ERROR)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(explicit: Option<&Path>) -> Result<WardenConfig> {
    match explicit {
        Some(path) => WardenConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(WardenConfig::load()),
    }
}

async fn run(args: CliArgs) -> Result<u8> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        SubCommand::Start => run_start(config).await,
        SubCommand::Stop { wait_secs } => run_stop(&config, Duration::from_secs(wait_secs)).await,
        SubCommand::Status { json } => run_status(&config, json),
        SubCommand::Ack { incident_id, by } => run_ack(&config, &incident_id, by),
        SubCommand::Recover { process_id } => run_recover(&config, &process_id),
        SubCommand::Beat { process_id, shutdown } => run_beat(&config, &process_id, shutdown).await,
    }
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_start(config: WardenConfig) -> Result<u8> {
    let data_dir = config.watchdog.data_dir.clone();
    let _lock = ProcessLock::acquire(&data_dir, ProcessLock::WATCHDOG)
        .context("Another watchdog already owns this data directory")?;

    if config.processes.is_empty() {
        bail!("No [[processes]] configured; nothing to supervise");
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  WARDEN - Autonomous Process Recovery");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    let gateway = EscalationGateway::from_config(&config.escalation, &config.watchdog.notification_dir())
        .context("Failed to build escalation channels")?;
    info!("📣 Escalation channels: {}", gateway.channel_names().join(", "));

    let watchdog = Watchdog::new(
        &config,
        Arc::new(ProcfsProbe::default()),
        Arc::new(BuiltinAction::os()),
        Arc::new(gateway),
    )?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_token.cancel();
    });

    watchdog.run(cancel_token).await?;

    info!("");
    info!("✓ Warden shutdown complete");
    Ok(0)
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 Received Ctrl+C, initiating shutdown...");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("🛑 Received Ctrl+C, initiating shutdown..."),
        _ = sigterm.recv() => info!("🛑 Received SIGTERM, initiating shutdown..."),
    }
}

async fn run_stop(config: &WardenConfig, wait: Duration) -> Result<u8> {
    let Some(pid) = ProcessLock::holder(&config.watchdog.data_dir, ProcessLock::WATCHDOG) else {
        info!("Watchdog is not running");
        return Ok(0);
    };

    sys::send_signal(pid, libc::SIGTERM).with_context(|| format!("Failed to signal watchdog (pid {pid})"))?;
    info!(pid, "Sent SIGTERM to watchdog");

    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if !sys::pid_alive(pid) {
            info!(pid, "✓ Watchdog stopped");
            return Ok(0);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    bail!("Watchdog (pid {pid}) still running after {}s", wait.as_secs())
}

fn run_status(config: &WardenConfig, json: bool) -> Result<u8> {
    let settings = &config.watchdog;
    let index = IncidentIndex::load(&settings.incident_log_path()).context("Failed to read incident log")?;
    let snapshot = StatusSnapshot::read(&settings.status_path()).context("Failed to read status snapshot")?;
    let running = ProcessLock::holder(&settings.data_dir, ProcessLock::WATCHDOG);
    let report = StatusReport::build(&index, snapshot, running);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(report.exit_code)
}

fn run_ack(config: &WardenConfig, incident_id: &str, by: Option<String>) -> Result<u8> {
    let settings = &config.watchdog;
    let log_path = settings.incident_log_path();
    let index = IncidentIndex::load(&log_path).context("Failed to read incident log")?;
    let Some(incident) = index.get(incident_id) else {
        bail!("Unknown incident {incident_id}");
    };
    if !incident.awaiting_acknowledgement() {
        bail!("Incident {incident_id} is {} and not awaiting acknowledgement", incident.status);
    }

    if ProcessLock::holder(&settings.data_dir, ProcessLock::WATCHDOG).is_some() {
        let inbox = ControlInbox::new(settings.inbox_dir());
        let path = inbox.submit(&ControlRequest::Acknowledge {
            incident_id: incident_id.to_string(),
            by,
            requested_at: Utc::now(),
        })?;
        info!(incident = incident_id, request = %path.display(), "Acknowledgement queued for the running watchdog");
        return Ok(0);
    }

    // No watchdog: take its lock so the log still has a single writer
    let _lock = ProcessLock::acquire(&settings.data_dir, ProcessLock::WATCHDOG)?;
    let mut manager = IncidentManager::open(&log_path)?;
    manager.acknowledge(incident_id, by, Utc::now())?;
    Ok(0)
}

fn run_recover(config: &WardenConfig, process_id: &str) -> Result<u8> {
    let settings = &config.watchdog;
    if config.process(process_id).is_none() {
        bail!("Unknown process {process_id}");
    }
    if ProcessLock::holder(&settings.data_dir, ProcessLock::WATCHDOG).is_none() {
        bail!("Watchdog is not running; start it with `warden start`");
    }

    let inbox = ControlInbox::new(settings.inbox_dir());
    let path = inbox.submit(&ControlRequest::Recover {
        process_id: process_id.to_string(),
        requested_at: Utc::now(),
    })?;
    info!(process = process_id, request = %path.display(), "Recovery request queued");
    Ok(0)
}

async fn run_beat(config: &WardenConfig, process_id: &str, shutdown: bool) -> Result<u8> {
    let Some(process) = config.process(process_id) else {
        bail!("Unknown process {process_id}");
    };
    let mut emitter = HeartbeatEmitter::new(
        process_id,
        process.heartbeat_file(&config.watchdog.data_dir),
        process.emit_interval(),
    );

    if shutdown {
        emitter.emit_shutdown()?;
        info!(process = process_id, "Graceful shutdown marker written");
        return Ok(0);
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_token.cancel();
    });
    emitter.run(cancel_token).await?;
    Ok(0)
}
