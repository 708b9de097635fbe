//! Remediation building blocks shared by config, recovery and bootstrap

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What a strategy does when selected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Terminate and relaunch with the same configuration
    QuickRestart,
    /// Relaunch with the safe-mode arguments
    SafeMode,
    /// Restore the newest config snapshot, then restart
    ConfigRollback,
    /// Restart declared upstream dependencies, then restart
    DependencyRestart,
    /// Restore state from the newest backup, then restart
    BackupRestore,
    /// Run the emergency bootstrap, then restart
    FullBootstrap,
    /// Run an operator-supplied command
    Command,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::QuickRestart => "quick_restart",
            ActionKind::SafeMode => "safe_mode",
            ActionKind::ConfigRollback => "config_rollback",
            ActionKind::DependencyRestart => "dependency_restart",
            ActionKind::BackupRestore => "backup_restore",
            ActionKind::FullBootstrap => "full_bootstrap",
            ActionKind::Command => "command",
        };
        write!(f, "{name}")
    }
}

/// An external program invocation.
///
/// Arguments may contain `{placeholder}` tokens that callers substitute
/// before spawning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Copy of the arguments with every `{key}` replaced by its value
    pub fn render_args(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
