use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Largest accepted write interval and skew tolerance, in seconds.
pub const MAX_CONFIG_SECS: i64 = 86_400;

/// Session settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub save_file_name: String,
    /// Minimum seconds between non-forced local writes. 0 disables throttling.
    pub min_write_interval_secs: f64,
    pub sync: SyncConfig,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            save_file_name: "save_v1.json".to_string(),
            min_write_interval_secs: 1.0,
            sync: SyncConfig::default(),
        }
    }
}

impl SaveConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.save_file_name.trim().is_empty() {
            return Err(EngineError::Config("save_file_name is empty".into()));
        }
        let interval = self.min_write_interval_secs;
        if !interval.is_finite() || interval > MAX_CONFIG_SECS as f64 {
            return Err(EngineError::Config(format!(
                "min_write_interval_secs must be finite and at most {MAX_CONFIG_SECS}, got {interval}"
            )));
        }
        self.sync.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cloud_save_file_name: String,
    pub cloud_manifest_file_name: String,
    /// Remote must be newer than local by more than this to win.
    pub skew_tolerance_secs: i64,
    pub auto_sync_on_save: bool,
    /// Log startup decisions at info instead of debug.
    pub verbose_logs: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cloud_save_file_name: "save_v1.json".to_string(),
            cloud_manifest_file_name: "save_v1.meta.json".to_string(),
            skew_tolerance_secs: 2,
            auto_sync_on_save: true,
            verbose_logs: true,
        }
    }
}

impl SyncConfig {
    pub fn skew_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.skew_tolerance_secs.clamp(0, MAX_CONFIG_SECS))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cloud_save_file_name.trim().is_empty() {
            return Err(EngineError::Config("cloud_save_file_name is empty".into()));
        }
        if self.skew_tolerance_secs > MAX_CONFIG_SECS {
            return Err(EngineError::Config(format!(
                "skew_tolerance_secs must be at most {MAX_CONFIG_SECS}, got {}",
                self.skew_tolerance_secs
            )));
        }
        if self.cloud_manifest_file_name == self.cloud_save_file_name {
            return Err(EngineError::Config(
                "cloud manifest and payload must use different names".into(),
            ));
        }
        Ok(())
    }
}

impl SaveConfig {
    pub fn min_write_interval(&self) -> Duration {
        let secs = self.min_write_interval_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs.min(MAX_CONFIG_SECS as f64)).unwrap_or(Duration::ZERO)
    }
}
