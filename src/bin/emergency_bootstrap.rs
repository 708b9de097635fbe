//! Emergency Bootstrap
//!
//! Brings an installation back to a state where the watchdog can run:
//! diagnose, repair, recover services, verify. Logs go to stderr; stdout
//! carries only the JSON report.
//!
//! Usage:
//!   emergency-bootstrap                 # all four phases
//!   emergency-bootstrap diagnose
//!   emergency-bootstrap --manifest /etc/warden/bootstrap.toml repair
//!
//! Exit codes: 0 success, 1 checks still failing, 2 fatal (watchdog could not
//! be brought back), 3 invocation error.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use warden::bootstrap::{BootstrapManifest, EmergencyBootstrap, Phase};

const EXIT_SUCCESS: u8 = 0;
const EXIT_CHECKS_FAILING: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_INVOCATION_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "emergency-bootstrap")]
#[command(about = "Last-resort recovery when the watchdog cannot start")]
#[command(version)]
struct CliArgs {
    /// Bootstrap manifest (TOML); defaults to $WARDEN_BOOTSTRAP_MANIFEST, then ./bootstrap.toml
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// Phase to run; all four when omitted
    #[command(subcommand)]
    phase: Option<PhaseCommand>,
}

#[derive(clap::Subcommand, Debug, Clone, Copy)]
enum PhaseCommand {
    /// Check directories, files, modules, disk and services
    Diagnose,
    /// Recreate directories and reinstall missing modules
    Repair,
    /// Start stopped services in order
    Recover,
    /// Diagnose again after changes
    Verify,
}

impl From<PhaseCommand> for Phase {
    fn from(cmd: PhaseCommand) -> Self {
        match cmd {
            PhaseCommand::Diagnose => Phase::Diagnose,
            PhaseCommand::Repair => Phase::Repair,
            PhaseCommand::Recover => Phase::Recover,
            PhaseCommand::Verify => Phase::Verify,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_INVOCATION_ERROR } else { EXIT_SUCCESS };
            if let Err(print_err) = e.print() {
                eprintln!("emergency-bootstrap: could not print usage: {print_err}");
            }
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_INVOCATION_ERROR)
        }
    }
}

async fn run(args: CliArgs) -> anyhow::Result<u8> {
    let manifest = BootstrapManifest::load(args.manifest.as_deref()).context("Failed to load bootstrap manifest")?;
    let report_dir = manifest.report_dir.clone();

    let phases: Vec<Phase> = match args.phase {
        Some(cmd) => vec![cmd.into()],
        None => Phase::ALL.to_vec(),
    };

    let bootstrap = EmergencyBootstrap::new(manifest);
    let report = bootstrap.run(&phases).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.write_to(&report_dir) {
        Ok(path) => info!(path = %path.display(), "📄 Bootstrap report written"),
        Err(e) => warn!(error = %e, "Failed to write bootstrap report artifact"),
    }

    let code = if report.fatal {
        EXIT_FATAL
    } else if report.success {
        EXIT_SUCCESS
    } else {
        EXIT_CHECKS_FAILING
    };
    Ok(code)
}
