//! Configuration types for playback sync and voice activity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a watch party client
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WatchPartyConfig {
    /// Playback synchronization tunables
    #[serde(default)]
    pub sync: SyncConfig,

    /// Voice activity sampling
    #[serde(default)]
    pub vad: VadConfig,
}

/// Playback synchronization tunables
///
/// `heartbeat_interval_ms` and `drift_threshold_secs` are the two protocol
/// knobs. Raising the threshold trades looser sync for fewer hard corrections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Minimum spacing between host time-update pushes (default: 1000ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Drift above which a follower hard-corrects (default: 1.0s)
    #[serde(default = "default_drift_threshold_secs")]
    pub drift_threshold_secs: f64,

    /// How long the "syncing" indicator stays up after a correction (default: 300ms)
    #[serde(default = "default_syncing_indicator_ms")]
    pub syncing_indicator_ms: u64,

    /// Start the next-episode countdown when media ends (default: true)
    #[serde(default = "default_auto_advance_enabled")]
    pub auto_advance_enabled: bool,

    /// Length of the next-episode countdown (default: 5s)
    #[serde(default = "default_auto_advance_countdown_secs")]
    pub auto_advance_countdown_secs: u32,
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_drift_threshold_secs() -> f64 {
    1.0
}

fn default_syncing_indicator_ms() -> u64 {
    300
}

fn default_auto_advance_enabled() -> bool {
    true
}

fn default_auto_advance_countdown_secs() -> u32 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            drift_threshold_secs: default_drift_threshold_secs(),
            syncing_indicator_ms: default_syncing_indicator_ms(),
            auto_advance_enabled: default_auto_advance_enabled(),
            auto_advance_countdown_secs: default_auto_advance_countdown_secs(),
        }
    }
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn syncing_indicator(&self) -> Duration {
        Duration::from_millis(self.syncing_indicator_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `heartbeat_interval_ms` is zero
    /// - `drift_threshold_secs` is not a positive finite number
    /// - `auto_advance_countdown_secs` is zero while auto-advance is enabled
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }

        if !self.drift_threshold_secs.is_finite() || self.drift_threshold_secs <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "drift_threshold_secs must be positive, got {}",
                self.drift_threshold_secs
            )));
        }

        if self.auto_advance_enabled && self.auto_advance_countdown_secs == 0 {
            return Err(Error::InvalidConfig(
                "auto_advance_countdown_secs must be at least 1 when auto-advance is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Voice activity sampling configuration
///
/// The FFT window and the speaking threshold are fixed constants in
/// [`crate::vad`]; only the sampling cadence is tunable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VadConfig {
    /// Interval between analyser reads (default: 16ms, one animation frame)
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

fn default_sample_interval_ms() -> u64 {
    16
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

impl VadConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 || self.sample_interval_ms > 1000 {
            return Err(Error::InvalidConfig(format!(
                "sample_interval_ms must be in range 1-1000, got {}",
                self.sample_interval_ms
            )));
        }
        Ok(())
    }
}

impl WatchPartyConfig {
    /// Parse configuration from a YAML document
    ///
    /// Missing sections and fields fall back to their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use watchparty_core::config::WatchPartyConfig;
    ///
    /// let config = WatchPartyConfig::from_yaml_str("sync:\n  drift_threshold_secs: 2.0\n").unwrap();
    /// assert_eq!(config.sync.drift_threshold_secs, 2.0);
    /// assert_eq!(config.sync.heartbeat_interval_ms, 1000);
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.vad.validate()
    }
}
