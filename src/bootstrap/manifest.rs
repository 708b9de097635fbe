//! Pinned bootstrap manifest (TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::validation::{extend_with_command_keys, find_unknown_keys};
use crate::config::{defaults, ConfigError, WardenConfig};
use crate::types::CommandSpec;

/// What a healthy installation looks like and how to get back to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapManifest {
    /// Where `bootstrap_report_<timestamp>.json` files go
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// Directory holding `.bootstrap.lock`. Unset means the watchdog's
    /// `data_dir`, where supervisors look before recovering.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default = "default_min_free_disk_mb")]
    pub min_free_disk_mb: u64,
    /// Filesystem whose free space is checked
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_directories")]
    pub directories: Vec<PathBuf>,
    /// Must exist; never recreated automatically
    #[serde(default = "default_files")]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

/// An installable dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    /// Present when this command exits 0
    #[serde(default)]
    pub probe: Option<CommandSpec>,
    /// Present when this path exists
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Pinned reinstall command
    pub install: CommandSpec,
}

/// A long-running service to bring back, in `order`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Running when some process command line contains this
    #[serde(default)]
    pub match_pattern: Option<String>,
    /// Running when this lock file names a live pid
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    pub start: CommandSpec,
    #[serde(default)]
    pub order: u32,
    /// Failing to start a critical service is fatal
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "default_startup_wait")]
    pub startup_wait_secs: u64,
}

fn default_report_dir() -> PathBuf {
    Path::new(defaults::DATA_DIR).join("bootstrap")
}
fn default_min_free_disk_mb() -> u64 {
    defaults::MIN_FREE_DISK_MB
}
fn default_disk_path() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}
fn default_directories() -> Vec<PathBuf> {
    let data = Path::new(defaults::DATA_DIR);
    vec![
        data.to_path_buf(),
        data.join("heartbeats"),
        data.join("inbox"),
        data.join(defaults::NOTIFICATION_DIR),
    ]
}
fn default_files() -> Vec<PathBuf> {
    vec![PathBuf::from("warden.toml")]
}
fn default_services() -> Vec<ServiceSpec> {
    vec![ServiceSpec {
        name: "warden".to_string(),
        match_pattern: None,
        lock_file: Some(Path::new(defaults::DATA_DIR).join(crate::storage::ProcessLock::WATCHDOG)),
        start: CommandSpec::new("warden", ["start"]),
        order: 0,
        critical: true,
        startup_wait_secs: defaults::SERVICE_STARTUP_WAIT_SECS,
    }]
}
fn default_install_timeout() -> u64 {
    defaults::INSTALL_TIMEOUT_SECS
}
fn default_probe_timeout() -> u64 {
    defaults::PROBE_TIMEOUT_SECS
}
fn default_startup_wait() -> u64 {
    defaults::SERVICE_STARTUP_WAIT_SECS
}

impl Default for BootstrapManifest {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
            lock_dir: None,
            min_free_disk_mb: default_min_free_disk_mb(),
            disk_path: default_disk_path(),
            directories: default_directories(),
            files: default_files(),
            modules: Vec::new(),
            services: default_services(),
            install_timeout_secs: default_install_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn known_manifest_keys() -> HashSet<String> {
    let mut keys: HashSet<String> = [
        "report_dir",
        "lock_dir",
        "min_free_disk_mb",
        "disk_path",
        "directories",
        "files",
        "install_timeout_secs",
        "probe_timeout_secs",
        "modules",
        "modules.name",
        "modules.probe",
        "modules.path",
        "modules.install",
        "services",
        "services.name",
        "services.match_pattern",
        "services.lock_file",
        "services.start",
        "services.order",
        "services.critical",
        "services.startup_wait_secs",
    ]
    .iter()
    .map(|k| (*k).to_string())
    .collect();
    extend_with_command_keys(&mut keys, &["modules.probe", "modules.install", "services.start"]);
    keys
}

impl BootstrapManifest {
    /// Resolve the manifest: explicit path (errors returned), then
    /// `$WARDEN_BOOTSTRAP_MANIFEST`, then `./bootstrap.toml`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let manifest = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded bootstrap manifest");
            return Ok(manifest);
        }

        let candidates = std::env::var(defaults::BOOTSTRAP_MANIFEST_ENV)
            .ok()
            .map(PathBuf::from)
            .into_iter()
            .chain(std::iter::once(PathBuf::from("bootstrap.toml")));
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(manifest) => {
                    info!(path = %path.display(), "Loaded bootstrap manifest");
                    return Ok(manifest);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to load bootstrap manifest, falling back"),
            }
        }

        info!("No bootstrap manifest found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in find_unknown_keys(contents, &known_manifest_keys()) {
            warn!("{}", w);
        }
        let manifest: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.install_timeout_secs == 0 {
            errors.push("install_timeout_secs must be > 0".to_string());
        }
        if self.probe_timeout_secs == 0 {
            errors.push("probe_timeout_secs must be > 0".to_string());
        }
        for m in &self.modules {
            if m.probe.is_none() && m.path.is_none() {
                errors.push(format!("modules.{}: needs a probe command or a path", m.name));
            }
        }
        let mut names = HashSet::new();
        for s in &self.services {
            if !names.insert(s.name.as_str()) {
                errors.push(format!("services.{}: duplicate service name", s.name));
            }
            if s.match_pattern.is_none() && s.lock_file.is_none() {
                errors.push(format!("services.{}: needs a match_pattern or a lock_file", s.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Where `.bootstrap.lock` lives
    pub fn lock_dir(&self) -> PathBuf {
        match &self.lock_dir {
            Some(dir) => dir.clone(),
            None => WardenConfig::load().watchdog.data_dir,
        }
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Services in start order (name breaks ties)
    pub fn services_in_order(&self) -> Vec<&ServiceSpec> {
        let mut services: Vec<&ServiceSpec> = self.services.iter().collect();
        services.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_validates() {
        let manifest = BootstrapManifest::default();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.services[0].name, "warden");
        assert!(manifest.services[0].critical);
    }

    #[test]
    fn test_parse_modules_and_services() {
        let manifest = BootstrapManifest::from_toml_str(
            r#"
directories = ["/srv/app/data"]
files = ["/etc/app/app.toml"]
min_free_disk_mb = 1024

[[modules]]
name = "jq"
probe = { program = "jq", args = ["--version"] }
install = { program = "apt-get", args = ["install", "-y", "jq=1.6-2"] }

[[services]]
name = "launcher"
match_pattern = "/opt/app/launcher"
start = { program = "/opt/app/launcher" }
order = 2

[[services]]
name = "warden"
lock_file = "/srv/app/data/.warden.lock"
start = { program = "warden", args = ["start"] }
order = 1
critical = true
"#,
        )
        .unwrap();

        assert_eq!(manifest.modules[0].install.args, vec!["install", "-y", "jq=1.6-2"]);
        let order: Vec<&str> = manifest.services_in_order().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["warden", "launcher"], "watchdog before launcher");
        assert_eq!(manifest.services[0].startup_wait_secs, 5);
        assert!(manifest.lock_dir.is_none());
    }

    #[test]
    fn test_explicit_lock_dir_wins() {
        let manifest = BootstrapManifest::from_toml_str(r#"lock_dir = "/srv/app/locks""#).unwrap();
        assert_eq!(manifest.lock_dir(), PathBuf::from("/srv/app/locks"));
    }

    #[test]
    fn test_service_needs_a_liveness_check() {
        let err = BootstrapManifest::from_toml_str(
            r#"
[[services]]
name = "orphan"
start = { program = "true" }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs a match_pattern or a lock_file"));
    }
}
