use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::stack::StackError;

/// Scheduler configuration
///
/// Every field has a default, so partial YAML files work.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StackConfig {
    /// Maximum transfers attached to the engine at once
    pub concurrency_limit: usize,
    /// Timeout budget for records submitted without one (millis)
    pub default_timeout_ms: u64,
    /// Blocking budget for `remove(handle, wait = true)` (millis)
    pub wait_timeout_ms: u64,
    /// Blocking slice inside the waiter loop (millis)
    pub wait_slice_ms: u64,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            default_timeout_ms: 30_000,
            wait_timeout_ms: 30_000,
            wait_slice_ms: 50,
            log: LogConfig::default(),
        }
    }
}

impl StackConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StackError> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&content).map_err(|e| StackError::Config(e.to_string()))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

/// Log output configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "reqmux.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.wait_timeout(), Duration::from_secs(30));
        assert_eq!(config.wait_slice(), Duration::from_millis(50));
        assert_eq!(config.log.rotation, "daily");
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let config: StackConfig =
            serde_yaml::from_str("concurrency_limit: 2\nwait_slice_ms: 10\n").unwrap();
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.wait_slice_ms, 10);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.log.log_level, "info");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = StackConfig::load("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, StackError::Io(_)));
    }
}
