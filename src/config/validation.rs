//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.
//!
//! Arrays of tables (`[[processes]]`, `[[strategies]]`) contribute their
//! element keys under the array's own path, so `processes.program` is valid
//! regardless of index. Keys below an `env` table are free-form.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Keys of a `CommandSpec` table, appended under each place one can appear
const COMMAND_KEYS: &[&str] = &["program", "args", "env", "working_dir"];

/// Returns the complete set of valid dotted key paths for `WardenConfig`.
///
/// This is maintained manually to match the struct hierarchy in
/// watchdog_config.rs. Any new field added there must be added here too.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys: HashSet<String> = [
        // [watchdog]
        "watchdog",
        "watchdog.poll_interval_secs",
        "watchdog.confirmation_polls",
        "watchdog.cooldown_secs",
        "watchdog.global_restart_cap",
        "watchdog.self_heartbeat_interval_secs",
        "watchdog.data_dir",
        // [[processes]]
        "processes",
        "processes.id",
        "processes.heartbeat_path",
        "processes.match_pattern",
        "processes.pid_file",
        "processes.program",
        "processes.args",
        "processes.safe_mode_args",
        "processes.working_dir",
        "processes.env",
        "processes.heartbeat_emit_interval_secs",
        "processes.staleness_threshold_secs",
        "processes.terminate_grace_secs",
        "processes.rollback",
        "processes.rollback.config_path",
        "processes.rollback.snapshot_dir",
        "processes.dependencies",
        "processes.restore",
        "processes.restore.backup_dir",
        "processes.restore.command",
        "processes.bootstrap",
        // [[strategies]]
        "strategies",
        "strategies.name",
        "strategies.action",
        "strategies.command",
        "strategies.priority",
        "strategies.timeout_secs",
        "strategies.max_attempts_per_incident",
        "strategies.applies_to",
        // [escalation]
        "escalation",
        "escalation.channels",
        "escalation.channels.type",
        "escalation.channels.url",
        "escalation.channels.timeout_secs",
        "escalation.channels.dir",
    ]
    .iter()
    .map(|k| (*k).to_string())
    .collect();

    extend_with_command_keys(
        &mut keys,
        &[
            "processes.dependencies",
            "processes.restore.command",
            "processes.bootstrap",
            "strategies.command",
        ],
    );
    keys
}

/// Add `<prefix>.program`, `<prefix>.args`, ... for every command table prefix
pub fn extend_with_command_keys(keys: &mut HashSet<String>, prefixes: &[&str]) {
    for prefix in prefixes {
        for k in COMMAND_KEYS {
            keys.insert(format!("{prefix}.{k}"));
        }
    }
}

/// Recursively walk a TOML value and collect dotted key paths.
///
/// Elements of arrays of tables are walked under the array's path.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        keys.extend(walk_toml_keys(item, &path));
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

/// Keys nested under an `env` table are user-chosen variable names
fn is_free_form(key: &str) -> bool {
    let mut segments: Vec<&str> = key.split('.').collect();
    segments.pop();
    segments.contains(&"env")
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so output is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for k in known {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        best = match best {
            Some((bk, bd)) if bd < dist || (bd == dist && bk <= k.as_str()) => Some((bk, bd)),
            _ => Some((k.as_str(), dist)),
        };
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry points)
// ============================================================================

/// Warnings for every key of `raw_toml` missing from `known`.
///
/// Unparseable input yields no warnings; serde reports the parse error later.
pub fn find_unknown_keys(raw_toml: &str, known: &HashSet<String>) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key) && !is_free_form(key))
        .filter(|key| seen.insert(key.clone()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

/// Parse a raw `warden.toml` and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    find_unknown_keys(raw_toml, &known_config_keys())
}
