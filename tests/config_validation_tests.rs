//! Config Validation Tests
//!
//! Typo detection (unknown keys with suggestions) and consistency validation
//! of `warden.toml`, exercised independently from the watchdog.

use warden::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use warden::config::{ChannelConfig, ConfigError, WardenConfig};
use warden::types::{ActionKind, Trigger};

fn validation_errors(toml_str: &str) -> Vec<String> {
    match WardenConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => errors,
        Err(other) => panic!("expected validation errors, got {other}"),
        Ok(_) => panic!("expected validation errors, config was accepted"),
    }
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_watchdog_section_warns_with_suggestion() {
    let toml_str = r#"
[watchdog]
pol_interval_secs = 5
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("pol_interval_secs"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("watchdog.poll_interval_secs"));
}

#[test]
fn typo_inside_array_of_tables_warns() {
    let toml_str = r#"
[[processes]]
id = "launcher"
program = "/opt/app/launcher"
staleness_treshold_secs = 120
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("processes.staleness_threshold_secs")
    );
}

#[test]
fn env_tables_are_free_form() {
    let toml_str = r#"
[[processes]]
id = "launcher"
program = "/opt/app/launcher"

[processes.env]
APP_MODE = "production"
SOME_UNUSUAL_NAME = "1"
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[watchdog]
poll_interval_secs = 10
confirmation_polls = 2
cooldown_secs = 60
global_restart_cap = 5
data_dir = "/var/lib/warden"

[[processes]]
id = "launcher"
program = "/opt/app/launcher"
args = ["--serve"]
pid_file = "/run/launcher.pid"
match_pattern = "/opt/app/launcher"

[processes.rollback]
config_path = "/etc/app/app.toml"
snapshot_dir = "/var/lib/app/config-snapshots"

[[processes.dependencies]]
program = "systemctl"
args = ["restart", "postgresql"]

[[strategies]]
name = "quick_restart"
action = "quick_restart"
priority = 1
timeout_secs = 30

[[strategies]]
name = "flush_cache"
action = "command"
command = { program = "/opt/app/bin/flush-cache", args = ["{process_id}"] }
priority = 2
timeout_secs = 60
applies_to = ["stale_heartbeat"]

[escalation]
channels = [{ type = "log" }, { type = "webhook", url = "https://ops.example.com/hook" }]
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Unexpected warnings: {:?}", warnings);

    let config = WardenConfig::from_toml_str(toml_str).expect("valid config");
    assert_eq!(config.strategies.len(), 2, "explicit table replaces the stock one");
    assert_eq!(config.strategies[1].action, ActionKind::Command);
    assert_eq!(config.strategies[1].applies_to, vec![Trigger::StaleHeartbeat]);
    assert!(matches!(config.escalation.channels[1], ChannelConfig::Webhook { timeout_secs: 10, .. }));
}

#[test]
fn suggestion_is_none_for_distant_keys() {
    let known = known_config_keys();
    assert_eq!(suggest_correction("completely_unrelated_key_name", &known), None);
}

// ============================================================================
// Consistency Validation
// ============================================================================

#[test]
fn empty_config_uses_stock_strategy_table() {
    let config = WardenConfig::from_toml_str("").expect("empty config is valid");
    let names: Vec<&str> = config.strategies.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "quick_restart",
            "safe_mode",
            "config_rollback",
            "dependency_restart",
            "backup_restore",
            "full_bootstrap"
        ]
    );
    assert_eq!(config.watchdog.poll_interval_secs, 10);
    assert_eq!(config.watchdog.confirmation_polls, 2);
    assert_eq!(config.watchdog.global_restart_cap, 5);
}

#[test]
fn duplicate_priorities_are_rejected() {
    let errors = validation_errors(
        r#"
[[strategies]]
name = "quick_restart"
action = "quick_restart"
priority = 1
timeout_secs = 30

[[strategies]]
name = "safe_mode"
action = "safe_mode"
priority = 1
timeout_secs = 120
"#,
    );
    assert!(errors.iter().any(|e| e.contains("priority 1 is already used")), "{errors:?}");
}

#[test]
fn command_strategy_requires_command() {
    let errors = validation_errors(
        r#"
[[strategies]]
name = "custom"
action = "command"
priority = 1
timeout_secs = 30
"#,
    );
    assert!(errors.iter().any(|e| e.contains("requires a command")), "{errors:?}");
}

#[test]
fn staleness_must_exceed_emit_interval() {
    let errors = validation_errors(
        r#"
[[processes]]
id = "launcher"
program = "/opt/app/launcher"
heartbeat_emit_interval_secs = 30
staleness_threshold_secs = 30
"#,
    );
    assert!(errors.iter().any(|e| e.contains("staleness_threshold_secs (30)")), "{errors:?}");
}

#[test]
fn all_errors_are_collected() {
    let errors = validation_errors(
        r#"
[watchdog]
poll_interval_secs = 0
confirmation_polls = 0

[[processes]]
id = "a"
program = "x"

[[processes]]
id = "a"
program = "y"

[escalation]
channels = [{ type = "webhook", url = "ftp://nope", timeout_secs = 0 }]
"#,
    );
    assert!(errors.len() >= 5, "expected every problem reported, got {errors:?}");
    assert!(errors.iter().any(|e| e.contains("duplicate id 'a'")));
    assert!(errors.iter().any(|e| e.contains("must be http(s)")));
}

#[test]
fn unknown_action_is_a_parse_error() {
    let result = WardenConfig::from_toml_str(
        r#"
[[strategies]]
name = "reboot"
action = "reboot_host"
priority = 1
timeout_secs = 30
"#,
    );
    assert!(matches!(result, Err(ConfigError::Parse(..))));
}
