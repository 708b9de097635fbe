//! Watchdog
//!
//! Separate OS process that drives one [`ProcessSupervisor`] per supervised
//! process. Each poll: read the heartbeat, probe the process table, evaluate,
//! and on a confirmed failure open (or reuse) the process's incident and let
//! the Recovery Agent try the next strategy.
//!
//! ## Runtime layout
//!
//! `Watchdog::run` spawns into a `JoinSet`:
//! - one supervisor task per process (poll ticker + command channel)
//! - a control task (inbox requests, status snapshot)
//! - the watchdog's own heartbeat emitter
//!
//! Any task failing (only incident log write failures do) cancels the rest.

pub mod control;
pub mod event_log;
pub mod status;

pub use control::{ControlInbox, ControlRequest};
pub use event_log::{EventLog, EventRecord, WatchdogEvent};
pub use status::{ProcessStatus, StatusBoard, StatusReport, StatusSnapshot};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ProcessConfig, WardenConfig};
use crate::escalation::EscalationGateway;
use crate::heartbeat::{read_heartbeat, HeartbeatEmitter};
use crate::incident::{IncidentError, IncidentManager};
use crate::monitor::{DetectionError, Evaluation, HealthMonitor, Observation, ProcessProbe, Verdict};
use crate::recovery::{RecoveryAgent, RecoveryOutcome, StrategyAction, StrategyTable};
use crate::storage::ProcessLock;
use crate::types::{HeartbeatState, Incident, ProcessRecord, Trigger, WatchState};

/// Process id the watchdog uses for its own heartbeat
pub const SELF_PROCESS_ID: &str = "warden";

/// Keep invalid-transition errors out of the loop; only persistence errors
/// are fatal.
fn tolerate<T>(result: Result<T, IncidentError>) -> Result<Option<T>, IncidentError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "Ignoring invalid incident transition");
            Ok(None)
        }
    }
}

// ============================================================================
// Per-process supervisor
// ============================================================================

/// Requests routed to one supervisor from the control path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// A human acknowledged this escalated incident
    Acknowledged { incident_id: String },
    /// Operator asked for recovery now
    Recover,
}

/// Result of one poll or command
#[derive(Debug, Clone)]
pub struct TickReport {
    pub evaluation: Option<Evaluation>,
    pub state: WatchState,
    pub incident_id: Option<String>,
    pub recovery: Option<RecoveryOutcome>,
}

pub struct ProcessSupervisor {
    target: ProcessConfig,
    heartbeat_path: PathBuf,
    /// Where an emergency bootstrap leaves `.bootstrap.lock`
    lock_dir: PathBuf,
    /// Pid of the bootstrap we last deferred to
    deferred_to: Option<u32>,
    record: ProcessRecord,
    monitor: HealthMonitor,
    state: WatchState,
    last_evaluation: Option<Evaluation>,
    probe: Arc<dyn ProcessProbe>,
    agent: Arc<RecoveryAgent>,
    incidents: Arc<Mutex<IncidentManager>>,
    events: Arc<EventLog>,
}

impl ProcessSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: ProcessConfig,
        heartbeat_path: PathBuf,
        lock_dir: PathBuf,
        confirmation_polls: u32,
        probe: Arc<dyn ProcessProbe>,
        agent: Arc<RecoveryAgent>,
        incidents: Arc<Mutex<IncidentManager>>,
        events: Arc<EventLog>,
        now: DateTime<Utc>,
    ) -> Self {
        let monitor = HealthMonitor::new(target.staleness_threshold(), confirmation_polls, now);
        Self {
            record: ProcessRecord::new(target.id.clone()),
            target,
            heartbeat_path,
            lock_dir,
            deferred_to: None,
            monitor,
            state: WatchState::Monitoring,
            last_evaluation: None,
            probe,
            agent,
            incidents,
            events,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.target.id
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut ProcessRecord {
        &mut self.record
    }

    pub async fn status(&self) -> ProcessStatus {
        let active_incident = self
            .incidents
            .lock()
            .await
            .active_incident(&self.target.id)
            .map(|i| i.incident_id.clone());
        ProcessStatus {
            process_id: self.target.id.clone(),
            state: self.state,
            last_verdict: self.last_evaluation.as_ref().map(|e| e.verdict.to_string()),
            detail: self.last_evaluation.as_ref().map(|e| e.detail.clone()),
            record: self.record.clone(),
            active_incident,
        }
    }

    fn set_state(&mut self, to: WatchState) {
        if self.state == to {
            return;
        }
        info!(process = %self.target.id, from = %self.state, to = %to, "Process state changed");
        self.events.record(WatchdogEvent::StateChanged {
            process_id: self.target.id.clone(),
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn pid_from_file(&self) -> Option<u32> {
        let path = self.target.pid_file.as_ref()?;
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Gather heartbeat and process-table signals, adopting a newer pid
    fn observe(&mut self, now: DateTime<Utc>) -> Observation {
        let heartbeat = read_heartbeat(&self.heartbeat_path, &self.target.id).map_err(DetectionError::from);

        if let Ok(Some(hb)) = &heartbeat {
            self.record.last_known_heartbeat = Some(
                self.record.last_known_heartbeat.map_or(hb.emitted_at, |prev| prev.max(hb.emitted_at)),
            );
            let newer_than_launch = self.record.started_at.map_or(true, |started| hb.emitted_at > started);
            if let (Some(pid), HeartbeatState::Running, true) = (hb.pid, hb.state, newer_than_launch) {
                if self.record.observe_pid(pid, hb.emitted_at) {
                    debug!(process = %self.target.id, pid, "Adopted pid from heartbeat");
                }
            }
        }
        if self.record.pid.is_none() {
            if let Some(pid) = self.pid_from_file() {
                self.record.observe_pid(pid, now);
            }
        }
        if self.record.pid.is_none() {
            if let Some(pattern) = self.target.match_pattern.as_deref() {
                match self.probe.find(pattern) {
                    Ok(Some(pid)) => {
                        self.record.observe_pid(pid, now);
                        debug!(process = %self.target.id, pid, "Adopted pid from process table");
                    }
                    Ok(None) => {}
                    Err(e) => debug!(process = %self.target.id, error = %e, "Process table scan failed"),
                }
            }
        }

        let presence = match self.record.pid {
            Some(pid) => self
                .probe
                .presence(pid, self.target.match_pattern.as_deref())
                .map(Some),
            None => Ok(None),
        };

        Observation { heartbeat, presence }
    }

    /// One poll of the state machine
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<TickReport, IncidentError> {
        let observation = self.observe(now);
        let evaluation = self.monitor.evaluate(now, observation);
        debug!(
            process = %self.target.id,
            verdict = %evaluation.verdict,
            detail = %evaluation.detail,
            "Poll evaluated"
        );
        self.last_evaluation = Some(evaluation.clone());

        let active = self.incidents.lock().await.active_incident(&self.target.id).cloned();
        let mut report = TickReport {
            evaluation: Some(evaluation.clone()),
            state: self.state,
            incident_id: active.as_ref().map(|i| i.incident_id.clone()),
            recovery: None,
        };

        if active.as_ref().is_some_and(|i| i.awaiting_acknowledgement()) {
            self.set_state(WatchState::Escalated);
            report.state = self.state;
            return Ok(report);
        }

        if evaluation.graceful_shutdown {
            if self.state != WatchState::Stopped {
                info!(process = %self.target.id, "🛑 Graceful shutdown observed, recovery disabled until it runs again");
                self.events.record(WatchdogEvent::GracefulShutdown { process_id: self.target.id.clone() });
            }
            self.set_state(WatchState::Stopped);
            report.state = self.state;
            return Ok(report);
        }

        match evaluation.verdict {
            Verdict::Healthy => {
                if let (Some(incident), Some(heartbeat_at)) = (active.as_ref(), evaluation.heartbeat_at) {
                    // Closable once a heartbeat postdates the last successful attempt
                    let closable = incident
                        .last_attempt()
                        .is_some_and(|a| a.succeeded() && heartbeat_at > a.completed_at());
                    if closable {
                        let closed = self.incidents.lock().await.close(&incident.incident_id, heartbeat_at, now);
                        if tolerate(closed)?.is_some() {
                            report.incident_id = None;
                        }
                    }
                }
                let next = if self.record.in_cooldown(now) { WatchState::Cooldown } else { WatchState::Monitoring };
                self.set_state(next);
            }
            Verdict::Suspect => {
                if report.incident_id.is_none() {
                    self.set_state(WatchState::Suspect);
                }
            }
            Verdict::Failed => {
                let trigger = evaluation.trigger.unwrap_or(Trigger::StaleHeartbeat);
                let incident_id = match active {
                    Some(incident) => incident.incident_id,
                    None => {
                        let Some(incident) = self.open_incident(trigger, &evaluation, now).await? else {
                            report.state = self.state;
                            return Ok(report);
                        };
                        incident.incident_id
                    }
                };
                report.incident_id = Some(incident_id.clone());
                report.recovery = self.recover(&incident_id, now).await?;
            }
        }

        report.state = self.state;
        Ok(report)
    }

    async fn open_incident(
        &mut self,
        trigger: Trigger,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<Option<Incident>, IncidentError> {
        let opened = self.incidents.lock().await.open_incident(&self.target.id, trigger, now);
        let Some(incident) = tolerate(opened)? else {
            return Ok(None);
        };

        let event = match trigger {
            Trigger::ProcessExit => WatchdogEvent::ProcessDown {
                process_id: self.target.id.clone(),
                pid: self.record.pid,
                detail: evaluation.detail.clone(),
            },
            Trigger::StaleHeartbeat | Trigger::Explicit => WatchdogEvent::HeartbeatTimeout {
                process_id: self.target.id.clone(),
                detail: evaluation.detail.clone(),
            },
        };
        self.events.record(event);
        Ok(Some(incident))
    }

    async fn recover(&mut self, incident_id: &str, now: DateTime<Utc>) -> Result<Option<RecoveryOutcome>, IncidentError> {
        if let Some(pid) = ProcessLock::holder(&self.lock_dir, ProcessLock::BOOTSTRAP) {
            if self.deferred_to != Some(pid) {
                warn!(
                    process = %self.target.id,
                    incident = %incident_id,
                    bootstrap_pid = pid,
                    "Emergency bootstrap running, deferring recovery"
                );
                self.events.record(WatchdogEvent::RecoveryDeferred {
                    process_id: self.target.id.clone(),
                    incident_id: incident_id.to_string(),
                    bootstrap_pid: pid,
                });
                self.deferred_to = Some(pid);
            }
            return Ok(Some(RecoveryOutcome::BootstrapRunning { pid }));
        }
        self.deferred_to = None;

        if !self.record.in_cooldown(now) {
            self.set_state(WatchState::RecoveryTriggered);
        }

        let agent = Arc::clone(&self.agent);
        let outcome = agent
            .attempt_recovery(&self.incidents, incident_id, &mut self.record, &self.target, now)
            .await;
        let Some(outcome) = tolerate(outcome)? else {
            return Ok(None);
        };

        match &outcome {
            RecoveryOutcome::Attempted(attempt) => {
                self.events.record(WatchdogEvent::RecoveryAttempted {
                    process_id: self.target.id.clone(),
                    incident_id: incident_id.to_string(),
                    strategy: attempt.strategy_name.clone(),
                    outcome: attempt.outcome.to_string(),
                });
                self.set_state(WatchState::Cooldown);
            }
            RecoveryOutcome::CoolingDown { until } => {
                debug!(process = %self.target.id, until = %until.to_rfc3339(), "Recovery deferred by cooldown");
                self.set_state(WatchState::Cooldown);
            }
            RecoveryOutcome::Escalated(record) => {
                self.events.record(WatchdogEvent::Escalated {
                    process_id: self.target.id.clone(),
                    incident_id: incident_id.to_string(),
                    reason: record.reason.clone(),
                });
                self.set_state(WatchState::Escalated);
            }
            RecoveryOutcome::Frozen => self.set_state(WatchState::Escalated),
            RecoveryOutcome::BootstrapRunning { .. } => {}
        }
        Ok(Some(outcome))
    }

    /// Apply a routed command
    pub async fn handle(&mut self, command: SupervisorCommand, now: DateTime<Utc>) -> Result<TickReport, IncidentError> {
        let mut report = TickReport { evaluation: None, state: self.state, incident_id: None, recovery: None };

        match command {
            SupervisorCommand::Acknowledged { incident_id } => {
                self.record.reset_restarts();
                self.monitor.reset(now);
                self.events.record(WatchdogEvent::Acknowledged {
                    process_id: self.target.id.clone(),
                    incident_id,
                });
                self.set_state(WatchState::Monitoring);
            }
            SupervisorCommand::Recover => {
                let active = self.incidents.lock().await.active_incident(&self.target.id).cloned();
                let incident_id = match active {
                    Some(incident) if incident.awaiting_acknowledgement() => {
                        warn!(
                            process = %self.target.id,
                            incident = %incident.incident_id,
                            "Explicit recovery refused: escalation awaits acknowledgement"
                        );
                        report.incident_id = Some(incident.incident_id);
                        return Ok(report);
                    }
                    Some(incident) => incident.incident_id,
                    None => {
                        let evaluation = Evaluation {
                            verdict: Verdict::Failed,
                            trigger: Some(Trigger::Explicit),
                            graceful_shutdown: false,
                            heartbeat_at: None,
                            detail: "recovery requested by operator".to_string(),
                        };
                        match self.open_incident(Trigger::Explicit, &evaluation, now).await? {
                            Some(incident) => incident.incident_id,
                            None => return Ok(report),
                        }
                    }
                };
                report.incident_id = Some(incident_id.clone());
                report.recovery = self.recover(&incident_id, now).await?;
            }
        }

        report.state = self.state;
        Ok(report)
    }
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone)]
enum TaskName {
    Supervisor(String),
    Control,
    SelfHeartbeat,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Supervisor(id) => write!(f, "Supervisor[{id}]"),
            TaskName::Control => write!(f, "Control"),
            TaskName::SelfHeartbeat => write!(f, "SelfHeartbeat"),
        }
    }
}

// ============================================================================
// Watchdog
// ============================================================================

pub struct Watchdog {
    config: WardenConfig,
    supervisors: BTreeMap<String, ProcessSupervisor>,
    incidents: Arc<Mutex<IncidentManager>>,
    events: Arc<EventLog>,
    inbox: ControlInbox,
    board: Arc<StatusBoard>,
}

impl Watchdog {
    /// Replay the incident log and build one supervisor per process
    pub fn new(
        config: &WardenConfig,
        probe: Arc<dyn ProcessProbe>,
        action: Arc<dyn StrategyAction>,
        gateway: Arc<EscalationGateway>,
    ) -> Result<Self> {
        let settings = &config.watchdog;
        let table = StrategyTable::from_config(&config.strategies).context("Invalid strategy table")?;
        let agent = Arc::new(RecoveryAgent::new(
            table,
            action,
            gateway,
            settings.cooldown(),
            settings.global_restart_cap,
        ));

        let incident_log = settings.incident_log_path();
        let incidents = IncidentManager::open(&incident_log)
            .with_context(|| format!("Failed to open incident log {}", incident_log.display()))?;
        let incidents = Arc::new(Mutex::new(incidents));
        let events = Arc::new(EventLog::new(settings.event_log_path()));

        let now = Utc::now();
        let supervisors = config
            .processes
            .iter()
            .map(|target| {
                let supervisor = ProcessSupervisor::new(
                    target.clone(),
                    target.heartbeat_file(&settings.data_dir),
                    settings.data_dir.clone(),
                    settings.confirmation_polls,
                    Arc::clone(&probe),
                    Arc::clone(&agent),
                    Arc::clone(&incidents),
                    Arc::clone(&events),
                    now,
                );
                (target.id.clone(), supervisor)
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            supervisors,
            incidents,
            events,
            inbox: ControlInbox::new(settings.inbox_dir()),
            board: Arc::new(StatusBoard::new(settings.status_path())),
        })
    }

    pub fn supervisor(&self, process_id: &str) -> Option<&ProcessSupervisor> {
        self.supervisors.get(process_id)
    }

    pub fn supervisor_mut(&mut self, process_id: &str) -> Option<&mut ProcessSupervisor> {
        self.supervisors.get_mut(process_id)
    }

    pub fn incidents(&self) -> Arc<Mutex<IncidentManager>> {
        Arc::clone(&self.incidents)
    }

    /// Poll every supervisor once, in process id order
    pub async fn poll_all(&mut self, now: DateTime<Utc>) -> Result<BTreeMap<String, TickReport>, IncidentError> {
        let mut reports = BTreeMap::new();
        for (id, supervisor) in &mut self.supervisors {
            reports.insert(id.clone(), supervisor.poll_once(now).await?);
            self.board.update(supervisor.status().await);
        }
        Ok(reports)
    }

    /// Apply a control request directly to the owning supervisor
    pub async fn handle_request(
        &mut self,
        request: ControlRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<TickReport>, IncidentError> {
        let Some((process_id, command)) = resolve_request(&self.incidents, request, now).await? else {
            return Ok(None);
        };
        match self.supervisors.get_mut(&process_id) {
            Some(supervisor) => supervisor.handle(command, now).await.map(Some),
            None => {
                warn!(process = %process_id, "Control request for unsupervised process");
                Ok(None)
            }
        }
    }

    /// Run until cancelled or until a task fails
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Watchdog { config, supervisors, incidents, events, inbox, board } = self;
        let settings = config.watchdog.clone();

        info!("🐕 Starting Warden watchdog");
        info!("");
        info!("   Supervised processes: {}", supervisors.len());
        for (id, sup) in &supervisors {
            info!(
                "     - {} (staleness {}s, heartbeat {})",
                id,
                sup.target.staleness_threshold_secs,
                sup.heartbeat_path.display()
            );
        }
        info!("   Poll interval:        {}s", settings.poll_interval_secs);
        info!("   Confirmation polls:   {}", settings.confirmation_polls);
        info!("   Cooldown:             {}s", settings.cooldown_secs);
        info!("   Global restart cap:   {}", settings.global_restart_cap);
        info!("   Data directory:       {}", settings.data_dir.display());
        info!("");

        events.record(WatchdogEvent::Started {
            pid: std::process::id(),
            processes: supervisors.keys().cloned().collect(),
        });

        let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
        let mut senders = HashMap::new();

        for (id, supervisor) in supervisors {
            let (tx, rx) = mpsc::channel(16);
            senders.insert(id, tx);
            spawn_supervisor(&mut task_set, supervisor, rx, Arc::clone(&board), settings.poll_interval(), cancel.clone());
        }

        spawn_control(
            &mut task_set,
            inbox,
            Arc::clone(&incidents),
            senders,
            Arc::clone(&board),
            settings.poll_interval(),
            cancel.clone(),
        );

        let emitter = HeartbeatEmitter::new(
            SELF_PROCESS_ID,
            settings.self_heartbeat_path(),
            settings.self_heartbeat_interval(),
        );
        let emitter_cancel = cancel.clone();
        task_set.spawn(async move {
            emitter.run(emitter_cancel).await.context("Self-heartbeat emitter failed")?;
            Ok(TaskName::SelfHeartbeat)
        });

        let result = run_supervisor(&mut task_set, cancel).await;

        // Let tasks finish their shutdown work (final snapshot, shutdown marker)
        while let Some(joined) = task_set.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!("Task failed during shutdown: {:#}", e);
            }
        }

        let reason = match &result {
            Ok(()) => "shutdown requested".to_string(),
            Err(e) => format!("fatal: {e:#}"),
        };
        events.record(WatchdogEvent::Stopped { reason });
        let stats = incidents.lock().await.index().stats();
        info!(
            incidents = stats.total_incidents,
            recoveries = stats.total_recoveries,
            successful = stats.successful_recoveries,
            escalations = stats.escalations,
            "📊 Recovery summary: {}",
            stats
        );
        info!("✅ Warden watchdog stopped");
        result
    }
}

/// Acknowledge in the incident log, then say which supervisor to notify
async fn resolve_request(
    incidents: &Mutex<IncidentManager>,
    request: ControlRequest,
    now: DateTime<Utc>,
) -> Result<Option<(String, SupervisorCommand)>, IncidentError> {
    match request {
        ControlRequest::Acknowledge { incident_id, by, .. } => {
            let acked = incidents.lock().await.acknowledge(&incident_id, by, now);
            Ok(tolerate(acked)?.map(|incident| {
                (incident.process_id, SupervisorCommand::Acknowledged { incident_id })
            }))
        }
        ControlRequest::Recover { process_id, .. } => {
            info!(process = %process_id, "Explicit recovery requested");
            Ok(Some((process_id, SupervisorCommand::Recover)))
        }
    }
}

fn spawn_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut supervisor: ProcessSupervisor,
    mut commands: mpsc::Receiver<SupervisorCommand>,
    board: Arc<StatusBoard>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let name = TaskName::Supervisor(supervisor.process_id().to_string());
        info!("[{}] Task starting with interval {:?}", name, poll_interval);

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("[{}] Received shutdown signal", name);
                    return Ok(name);
                }
                _ = ticker.tick() => {
                    supervisor
                        .poll_once(Utc::now())
                        .await
                        .with_context(|| format!("{name}: incident log write failed"))?;
                }
                Some(command) = commands.recv() => {
                    supervisor
                        .handle(command, Utc::now())
                        .await
                        .with_context(|| format!("{name}: incident log write failed"))?;
                }
            }
            board.update(supervisor.status().await);
        }
    });
}

fn spawn_control(
    task_set: &mut JoinSet<Result<TaskName>>,
    inbox: ControlInbox,
    incidents: Arc<Mutex<IncidentManager>>,
    senders: HashMap<String, mpsc::Sender<SupervisorCommand>>,
    board: Arc<StatusBoard>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[{}] Task starting, inbox {}", TaskName::Control, inbox.dir().display());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    if let Err(e) = board.write(Utc::now()) {
                        warn!("Final status snapshot failed: {}", e);
                    }
                    return Ok(TaskName::Control);
                }
                _ = ticker.tick() => {}
            }

            let pending = match inbox.drain() {
                Ok(pending) => pending,
                Err(e) => {
                    warn!("Control inbox unreadable: {}", e);
                    Vec::new()
                }
            };
            for (path, request) in pending {
                match request {
                    Ok(request) => {
                        let routed = resolve_request(&incidents, request, Utc::now())
                            .await
                            .context("Control: incident log write failed")?;
                        if let Some((process_id, command)) = routed {
                            match senders.get(&process_id) {
                                Some(tx) => {
                                    if tx.send(command).await.is_err() {
                                        warn!(process = %process_id, "Supervisor gone, dropping command");
                                    }
                                }
                                None => warn!(process = %process_id, "Control request for unsupervised process"),
                            }
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Discarding unreadable control request"),
                }
                inbox.complete(&path);
            }

            if let Err(e) = board.write(Utc::now()) {
                warn!("Status snapshot write failed: {}", e);
            }
        }
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
