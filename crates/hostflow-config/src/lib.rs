pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CANDIDATES: [&str; 4] = [
    "hostflow.local.yaml",
    ".hostflow.local.yaml",
    "hostflow.yaml",
    ".hostflow.yaml",
];

/// Top-level configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostflowConfig {
    /// Directory holding the file-backed host and event store
    pub state_dir: PathBuf,

    /// Default log filter, overridden by RUST_LOG
    pub log_level: String,

    /// In-job retry of transient provider failures
    pub retry: RetrySettings,

    pub dispatcher: DispatcherSettings,

    pub provision: ProvisionSettings,

    pub reconcile: ReconcileSettings,

    pub sakura: SakuraSettings,
}

impl Default for HostflowConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".hostflow"),
            log_level: "info".to_string(),
            retry: RetrySettings::default(),
            dispatcher: DispatcherSettings::default(),
            provision: ProvisionSettings::default(),
            reconcile: ReconcileSettings::default(),
            sakura: SakuraSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Retry policy and timeout applied by the local dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub max_attempts: u32,
    pub job_timeout_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            job_timeout_secs: 600,
        }
    }
}

impl DispatcherSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            timeout_secs: 900,
        }
    }
}

impl ProvisionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// How long stored status may disagree with the provider before the
    /// host is reported as stale
    pub staleness_secs: u64,

    /// Age after which an in-flight marker is treated as abandoned by a
    /// dead job. Keep it above `dispatcher.job_timeout_secs` and
    /// `provision.timeout_secs`.
    pub marker_lease_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            staleness_secs: 600,
            marker_lease_secs: 1_800,
        }
    }
}

impl ReconcileSettings {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn marker_lease(&self) -> Duration {
        Duration::from_secs(self.marker_lease_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SakuraSettings {
    pub zone: String,
}

impl Default for SakuraSettings {
    fn default() -> Self {
        Self {
            zone: "tk1a".to_string(),
        }
    }
}

/// Get the HostFlow config directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("hostflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the config file
///
/// Search order:
/// 1. HOSTFLOW_CONFIG_PATH environment variable
/// 2. Current directory: hostflow.local.yaml, .hostflow.local.yaml, hostflow.yaml, .hostflow.yaml
/// 3. ./.hostflow/ directory: same order
/// 4. ~/.config/hostflow/hostflow.yaml
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("HOSTFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let hostflow_dir = current_dir.join(".hostflow");
    if hostflow_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = hostflow_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("hostflow").join("hostflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load configuration from a specific file
pub fn load_from(path: impl AsRef<Path>) -> Result<HostflowConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from the discovered file, or defaults if there is none
pub fn load() -> Result<HostflowConfig> {
    match find_config_file() {
        Ok(path) => {
            tracing::debug!("Loading config from {}", path.display());
            load_from(path)
        }
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No config file found, using defaults");
            Ok(HostflowConfig::default())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hostflow.yaml");
        fs::write(
            &path,
            "state_dir: /var/lib/hostflow\nretry:\n  max_attempts: 7\nsakura:\n  zone: is1b\n",
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/hostflow"));
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.sakura.zone, "is1b");
        assert_eq!(config.dispatcher.max_attempts, 5);
        assert_eq!(config.reconcile.staleness(), Duration::from_secs(600));
        assert_eq!(config.reconcile.marker_lease(), Duration::from_secs(1_800));
    }

    #[test]
    fn test_invalid_yaml_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hostflow.yaml");
        fs::write(&path, "retry: [not, a, map]\n").unwrap();

        match load_from(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("hostflow.yaml"), "log_level: info\n").unwrap();
        fs::write(temp_dir.path().join("hostflow.local.yaml"), "log_level: debug\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with("hostflow.local.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_hostflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dir = temp_dir.path().join(".hostflow");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("hostflow.yaml"), "log_level: warn\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with(".hostflow/hostflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "log_level: trace\n").unwrap();

        unsafe {
            std::env::set_var("HOSTFLOW_CONFIG_PATH", config_path.to_str().unwrap());
        }

        let result = find_config_file().unwrap();
        assert_eq!(result, config_path);
        assert_eq!(load().unwrap().log_level, "trace");

        unsafe {
            std::env::remove_var("HOSTFLOW_CONFIG_PATH");
        }
    }
}
