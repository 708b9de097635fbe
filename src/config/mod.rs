//! Watchdog Configuration Module
//!
//! Supervised processes, strategy table and escalation channels loaded from
//! TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line (errors are fatal)
//! 2. `WARDEN_CONFIG` environment variable (path to TOML file)
//! 3. `warden.toml` in the current working directory
//! 4. Built-in defaults
//!
//! Unknown keys are reported as warnings with a suggested spelling; invalid
//! values fail validation with every problem listed at once.

mod watchdog_config;
pub mod defaults;
pub mod validation;

pub use watchdog_config::*;
