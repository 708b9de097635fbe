//! Recovery Agent: pick the next strategy for an incident, run it under a
//! hard timeout, and record the attempt.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::actions::{ActionContext, StrategyAction, StrategyError};
use super::strategy::{Strategy, StrategyTable};
use crate::config::ProcessConfig;
use crate::escalation::EscalationGateway;
use crate::incident::{IncidentError, IncidentManager};
use crate::types::{AttemptOutcome, EscalationRecord, Incident, ProcessRecord, StrategyAttempt};

/// What the agent will do for an incident right now
#[derive(Debug, Clone, Copy)]
pub enum Decision<'a> {
    /// Incident is escalated; nothing automated may run
    Frozen,
    /// Process reached its lifetime restart cap
    CapReached,
    /// No applicable strategy has attempts left
    Exhausted,
    CoolingDown { until: DateTime<Utc> },
    Attempt(&'a Strategy),
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Attempted(StrategyAttempt),
    CoolingDown { until: DateTime<Utc> },
    Escalated(EscalationRecord),
    Frozen,
    /// An emergency bootstrap is repairing the installation
    BootstrapRunning { pid: u32 },
}

pub struct RecoveryAgent {
    table: StrategyTable,
    action: Arc<dyn StrategyAction>,
    gateway: Arc<EscalationGateway>,
    cooldown: Duration,
    global_restart_cap: u32,
}

impl RecoveryAgent {
    pub fn new(
        table: StrategyTable,
        action: Arc<dyn StrategyAction>,
        gateway: Arc<EscalationGateway>,
        cooldown: Duration,
        global_restart_cap: u32,
    ) -> Self {
        Self { table, action, gateway, cooldown, global_restart_cap }
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub fn decide<'a>(
        &'a self,
        incident: &Incident,
        record: &ProcessRecord,
        target: &ProcessConfig,
        now: DateTime<Utc>,
    ) -> Decision<'a> {
        if !incident.is_open() {
            return Decision::Frozen;
        }
        if record.restart_count >= self.global_restart_cap {
            return Decision::CapReached;
        }
        let Some(strategy) = self.table.select(incident, target) else {
            return Decision::Exhausted;
        };
        match record.cooldown_until {
            Some(until) if now < until => Decision::CoolingDown { until },
            _ => Decision::Attempt(strategy),
        }
    }

    /// Run one strategy under its timeout. Never fails: errors and timeouts
    /// become FAILURE / TIMEOUT attempts.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        incident: &Incident,
        target: &ProcessConfig,
        pid: Option<u32>,
        started_at: DateTime<Utc>,
    ) -> (StrategyAttempt, Option<u32>) {
        let ctx = ActionContext { incident, target, strategy, pid };
        let clock = tokio::time::Instant::now();
        let result = match tokio::time::timeout(strategy.timeout, self.action.execute(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(StrategyError::Timeout(strategy.timeout_secs())),
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (outcome, error, relaunched_pid) = match result {
            Ok(report) => (AttemptOutcome::Success, None, report.relaunched_pid),
            Err(e @ StrategyError::Timeout(_)) => (AttemptOutcome::Timeout, Some(e.to_string()), None),
            Err(e) => (AttemptOutcome::Failure, Some(e.to_string()), None),
        };

        let attempt = StrategyAttempt {
            strategy_name: strategy.name.clone(),
            started_at,
            timeout_seconds: strategy.timeout_secs(),
            outcome,
            duration_ms,
            error,
        };
        (attempt, relaunched_pid)
    }

    /// Advance recovery of one incident by at most one strategy attempt.
    ///
    /// The incident manager is locked only around reads and appends, never
    /// while an action runs. Only persistence errors are returned.
    pub async fn attempt_recovery(
        &self,
        incidents: &Mutex<IncidentManager>,
        incident_id: &str,
        record: &mut ProcessRecord,
        target: &ProcessConfig,
        now: DateTime<Utc>,
    ) -> Result<RecoveryOutcome, IncidentError> {
        let incident = incidents
            .lock()
            .await
            .get(incident_id)
            .cloned()
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))?;

        let strategy = match self.decide(&incident, record, target, now) {
            Decision::Frozen => return Ok(RecoveryOutcome::Frozen),
            Decision::CoolingDown { until } => return Ok(RecoveryOutcome::CoolingDown { until }),
            Decision::CapReached => {
                let reason = format!(
                    "global restart cap reached ({}/{})",
                    record.restart_count, self.global_restart_cap
                );
                return self.escalate(incidents, &incident, &reason, now).await;
            }
            Decision::Exhausted => {
                let reason = format!(
                    "all applicable strategies exhausted after {} attempts",
                    incident.strategies_tried.len()
                );
                return self.escalate(incidents, &incident, &reason, now).await;
            }
            Decision::Attempt(strategy) => strategy,
        };

        info!(
            incident = %incident.incident_id,
            process = %target.id,
            strategy = %strategy.name,
            priority = strategy.priority,
            timeout_secs = strategy.timeout_secs(),
            "🔧 Attempting recovery strategy"
        );

        let (attempt, relaunched_pid) = self.execute(strategy, &incident, target, record.pid, now).await;
        match attempt.outcome {
            AttemptOutcome::Success => info!(
                incident = %incident.incident_id,
                strategy = %attempt.strategy_name,
                duration_ms = attempt.duration_ms,
                pid = ?relaunched_pid,
                "Strategy completed, awaiting fresh heartbeat"
            ),
            _ => warn!(
                incident = %incident.incident_id,
                strategy = %attempt.strategy_name,
                outcome = %attempt.outcome,
                error = attempt.error.as_deref().unwrap_or(""),
                "Strategy did not complete"
            ),
        }

        incidents.lock().await.record_attempt(incident_id, attempt.clone())?;
        record.record_restart(relaunched_pid, attempt.completed_at(), self.cooldown);

        Ok(RecoveryOutcome::Attempted(attempt))
    }

    async fn escalate(
        &self,
        incidents: &Mutex<IncidentManager>,
        incident: &Incident,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryOutcome, IncidentError> {
        let record = incidents.lock().await.escalate(
            &incident.incident_id,
            reason,
            self.gateway.channel_names(),
            now,
        )?;

        let gateway = Arc::clone(&self.gateway);
        let notice = record.clone();
        tokio::spawn(async move {
            gateway.notify(&notice).await;
        });

        Ok(RecoveryOutcome::Escalated(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_strategies, StrategyConfig};
    use crate::recovery::actions::ActionReport;
    use crate::types::{ActionKind, Trigger};
    use async_trait::async_trait;
    use tempfile::tempdir;

    /// Sleeps for `delay`, then succeeds unless the strategy name is in `fail`
    struct ScriptedAction {
        delay: Duration,
        fail: Vec<&'static str>,
    }

    #[async_trait]
    impl StrategyAction for ScriptedAction {
        async fn execute(&self, ctx: &ActionContext<'_>) -> Result<ActionReport, StrategyError> {
            tokio::time::sleep(self.delay).await;
            if self.fail.contains(&ctx.strategy.name.as_str()) {
                return Err(StrategyError::Prerequisite("scripted failure".into()));
            }
            Ok(ActionReport { relaunched_pid: Some(777) })
        }
    }

    fn agent(action: ScriptedAction, cap: u32) -> RecoveryAgent {
        RecoveryAgent::new(
            StrategyTable::from_config(&default_strategies()).unwrap(),
            Arc::new(action),
            Arc::new(EscalationGateway::new(Vec::new())),
            Duration::from_secs(60),
            cap,
        )
    }

    fn setup() -> (tempfile::TempDir, Mutex<IncidentManager>, String) {
        let dir = tempdir().unwrap();
        let mut mgr = IncidentManager::open(&dir.path().join("incidents.jsonl")).unwrap();
        let id = mgr.open_incident("launcher", Trigger::StaleHeartbeat, Utc::now()).unwrap().incident_id;
        (dir, Mutex::new(mgr), id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_attempt_and_arms_cooldown() {
        let (_dir, mgr, id) = setup();
        let agent = agent(ScriptedAction { delay: Duration::from_secs(2), fail: vec![] }, 5);
        let target = ProcessConfig::new("launcher", "/bin/true");
        let mut record = ProcessRecord::new("launcher");
        let now = Utc::now();

        let outcome = agent.attempt_recovery(&mgr, &id, &mut record, &target, now).await.unwrap();
        let RecoveryOutcome::Attempted(attempt) = outcome else { panic!("expected an attempt") };
        assert_eq!(attempt.strategy_name, "quick_restart");
        assert_eq!(attempt.outcome, AttemptOutcome::Success);
        assert_eq!(attempt.duration_ms, 2_000);
        assert_eq!(record.pid, Some(777));
        assert_eq!(record.restart_count, 1);

        // Inside the cooldown nothing runs
        let again = agent.attempt_recovery(&mgr, &id, &mut record, &target, now).await.unwrap();
        assert!(matches!(again, RecoveryOutcome::CoolingDown { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_distinctly() {
        let (_dir, mgr, id) = setup();
        let agent = agent(ScriptedAction { delay: Duration::from_secs(45), fail: vec![] }, 5);
        let target = ProcessConfig::new("launcher", "/bin/true");
        let mut record = ProcessRecord::new("launcher");

        let outcome = agent.attempt_recovery(&mgr, &id, &mut record, &target, Utc::now()).await.unwrap();
        let RecoveryOutcome::Attempted(attempt) = outcome else { panic!("expected an attempt") };
        assert_eq!(attempt.outcome, AttemptOutcome::Timeout);
        assert_eq!(attempt.duration_ms, 30_000);
        assert_eq!(record.pid, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_reached_escalates() {
        let (_dir, mgr, id) = setup();
        let agent = agent(ScriptedAction { delay: Duration::ZERO, fail: vec![] }, 2);
        let target = ProcessConfig::new("launcher", "/bin/true");
        let mut record = ProcessRecord::new("launcher");
        record.restart_count = 2;

        let outcome = agent.attempt_recovery(&mgr, &id, &mut record, &target, Utc::now()).await.unwrap();
        let RecoveryOutcome::Escalated(esc) = outcome else { panic!("expected escalation") };
        assert!(esc.reason.starts_with("global restart cap reached"));

        let frozen = agent.attempt_recovery(&mgr, &id, &mut record, &target, Utc::now()).await.unwrap();
        assert!(matches!(frozen, RecoveryOutcome::Frozen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_table_escalates() {
        let dir = tempdir().unwrap();
        let mut mgr = IncidentManager::open(&dir.path().join("incidents.jsonl")).unwrap();
        let id = mgr.open_incident("launcher", Trigger::ProcessExit, Utc::now()).unwrap().incident_id;
        let mgr = Mutex::new(mgr);

        let agent = RecoveryAgent::new(
            StrategyTable::from_config(&[StrategyConfig::builtin(ActionKind::QuickRestart, 1, 30)]).unwrap(),
            Arc::new(ScriptedAction { delay: Duration::ZERO, fail: vec!["quick_restart"] }),
            Arc::new(EscalationGateway::new(Vec::new())),
            Duration::ZERO,
            10,
        );
        let target = ProcessConfig::new("launcher", "/bin/true");
        let mut record = ProcessRecord::new("launcher");

        let first = agent.attempt_recovery(&mgr, &id, &mut record, &target, Utc::now()).await.unwrap();
        let RecoveryOutcome::Attempted(attempt) = first else { panic!("expected an attempt") };
        assert_eq!(attempt.outcome, AttemptOutcome::Failure);
        assert!(attempt.error.unwrap().contains("scripted failure"));

        let second = agent.attempt_recovery(&mgr, &id, &mut record, &target, Utc::now()).await.unwrap();
        assert!(matches!(second, RecoveryOutcome::Escalated(_)));
        assert!(mgr.lock().await.get(&id).unwrap().awaiting_acknowledgement());
    }
}
