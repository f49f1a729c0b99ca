//! Daemon configuration.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Simulator daemon configuration.
///
/// All intervals are expressed in milliseconds in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimdConfig {
    /// Path of the durable state snapshot
    pub data_file: PathBuf,
    /// Fixed autosave interval
    pub autosave_interval_ms: u64,
    /// Debounce applied after a commit before the dirty snapshot is written
    pub save_debounce_ms: u64,
    /// Spanning-Tree hello interval
    pub hello_time_ms: u64,
    /// Spanning-Tree forward delay (full traversal time)
    pub forward_delay_ms: u64,
    /// Window after which a topology-change flag auto-clears
    pub topology_change_window_ms: u64,
    /// Spanning-Tree scheduler tick granularity
    pub stp_tick_ms: u64,
    /// Traffic pattern activated at startup
    pub default_pattern: String,
}

impl Default for SimdConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("labswitch-state.json"),
            autosave_interval_ms: 30_000,
            save_debounce_ms: 500,
            hello_time_ms: 2_000,
            forward_delay_ms: 15_000,
            topology_change_window_ms: 30_000,
            stp_tick_ms: 250,
            default_pattern: "medium".to_string(),
        }
    }
}

impl SimdConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Validation(format!("cannot read config {}: {}", path.display(), e)))?;
        let config: SimdConfig = toml::from_str(&raw)
            .map_err(|e| SimError::Validation(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks interval sanity.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("autosave_interval_ms", self.autosave_interval_ms),
            ("hello_time_ms", self.hello_time_ms),
            ("forward_delay_ms", self.forward_delay_ms),
            ("topology_change_window_ms", self.topology_change_window_ms),
            ("stp_tick_ms", self.stp_tick_ms),
        ] {
            if value == 0 {
                return Err(SimError::Validation(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn hello_time(&self) -> Duration {
        Duration::from_millis(self.hello_time_ms)
    }

    pub fn forward_delay(&self) -> Duration {
        Duration::from_millis(self.forward_delay_ms)
    }

    pub fn topology_change_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.topology_change_window_ms as i64)
    }

    pub fn stp_tick(&self) -> Duration {
        Duration::from_millis(self.stp_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimdConfig::default();
        assert_eq!(config.hello_time(), Duration::from_secs(2));
        assert_eq!(config.forward_delay(), Duration::from_secs(15));
        assert_eq!(config.topology_change_window(), chrono::Duration::seconds(30));
        assert_eq!(config.default_pattern, "medium");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: SimdConfig = toml::from_str("hello_time_ms = 500").unwrap();
        assert_eq!(config.hello_time(), Duration::from_millis(500));
        assert_eq!(config.forward_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config: SimdConfig = toml::from_str("forward_delay_ms = 0").unwrap();
        assert!(matches!(config.validate(), Err(SimError::Validation(_))));
    }

    #[test]
    fn test_load_missing_file_is_validation_error() {
        let err = SimdConfig::load(Path::new("/nonexistent/labswitchd.toml")).unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));
    }
}
