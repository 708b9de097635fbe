//! Ordered remediation table and selection

use std::collections::HashSet;
use std::time::Duration;

use crate::config::{ProcessConfig, StrategyConfig};
use crate::types::{ActionKind, CommandSpec, Incident, Trigger};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StrategyTableError {
    #[error("strategy table is empty")]
    Empty,
    #[error("strategies '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority { priority: u32, first: String, second: String },
    #[error("strategy name '{0}' is used twice")]
    DuplicateName(String),
    #[error("strategy '{0}' has action \"command\" but no command")]
    MissingCommand(String),
}

/// One executable remediation step
#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: String,
    pub action: ActionKind,
    pub command: Option<CommandSpec>,
    pub priority: u32,
    pub timeout: Duration,
    pub max_attempts_per_incident: u32,
    pub applies_to: Vec<Trigger>,
}

impl From<&StrategyConfig> for Strategy {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            action: cfg.action,
            command: cfg.command.clone(),
            priority: cfg.priority,
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_attempts_per_incident: cfg.max_attempts_per_incident.max(1),
            applies_to: cfg.applies_to.clone(),
        }
    }
}

impl Strategy {
    /// Trigger filter AND the action's prerequisites on the target
    pub fn is_applicable(&self, incident: &Incident, target: &ProcessConfig) -> bool {
        if !self.applies_to.contains(&incident.trigger) {
            return false;
        }
        match self.action {
            ActionKind::QuickRestart | ActionKind::SafeMode | ActionKind::FullBootstrap => true,
            ActionKind::ConfigRollback => target.rollback.is_some(),
            ActionKind::DependencyRestart => !target.dependencies.is_empty(),
            ActionKind::BackupRestore => target.restore.is_some(),
            ActionKind::Command => self.command.is_some(),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

/// Strategies sorted by ascending priority.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: Vec<Strategy>,
}

impl StrategyTable {
    pub fn new(mut strategies: Vec<Strategy>) -> Result<Self, StrategyTableError> {
        if strategies.is_empty() {
            return Err(StrategyTableError::Empty);
        }
        strategies.sort_by_key(|s| s.priority);

        let mut names = HashSet::new();
        for s in &strategies {
            if !names.insert(s.name.as_str()) {
                return Err(StrategyTableError::DuplicateName(s.name.clone()));
            }
            if s.action == ActionKind::Command && s.command.is_none() {
                return Err(StrategyTableError::MissingCommand(s.name.clone()));
            }
        }
        for pair in strategies.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(StrategyTableError::DuplicatePriority {
                    priority: pair[0].priority,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        Ok(Self { strategies })
    }

    pub fn from_config(configs: &[StrategyConfig]) -> Result<Self, StrategyTableError> {
        Self::new(configs.iter().map(Strategy::from).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First strategy, by priority, that applies and still has attempts left
    /// for this incident. `None` means the table is exhausted.
    pub fn select(&self, incident: &Incident, target: &ProcessConfig) -> Option<&Strategy> {
        self.strategies.iter().find(|s| {
            s.is_applicable(incident, target) && incident.attempts_of(&s.name) < s.max_attempts_per_incident
        })
    }
}
