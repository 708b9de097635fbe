//! Recovery Agent
//!
//! Strategies form an ordered table (ascending priority). For an open
//! incident the agent selects the first strategy that applies to the
//! incident's trigger and target and still has attempts left, runs it under a
//! hard timeout, and records the attempt. An empty selection, or a process at
//! its lifetime restart cap, escalates to a human.

mod actions;
mod agent;
mod strategy;

pub use actions::{
    ActionContext, ActionReport, BuiltinAction, LauncherControl, OsLauncher, StrategyAction, StrategyError,
};
pub use agent::{Decision, RecoveryAgent, RecoveryOutcome};
pub use strategy::{Strategy, StrategyTable, StrategyTableError};
