//! Configuration types for stream conditioning

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConditionerError;

/// Which rate strategy drives the conditioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConditionerMode {
    /// No conditioning, the pipeline keeps its configured bitrate
    #[default]
    Off,

    /// Multiplicative shrink on loss, slow multiplicative growth after a clean minute
    Linear,

    /// Seven discrete levels with tiered recovery delays
    Stepped,
}

impl ConditionerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionerMode::Off => "off",
            ConditionerMode::Linear => "linear",
            ConditionerMode::Stepped => "stepped",
        }
    }
}

impl fmt::Display for ConditionerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionerMode {
    type Err = ConditionerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(ConditionerMode::Off),
            "linear" => Ok(ConditionerMode::Linear),
            "stepped" => Ok(ConditionerMode::Stepped),
            other => Err(ConditionerError::Invalid(format!(
                "unknown conditioner mode '{}' (expected off, linear or stepped)",
                other
            ))),
        }
    }
}

/// Polling cadence of the conditioner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay before the first tick
    pub delay: Duration,
    /// Interval between subsequent ticks
    pub interval: Duration,
}

impl PollTiming {
    pub const fn from_millis(delay_ms: u64, interval_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Polling only runs when both delay and interval are non-zero
    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero() && !self.interval.is_zero()
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self::from_millis(1000, 500)
    }
}

/// Stream conditioner configuration
///
/// Consumed when a conditioner is created and on every `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Strategy selection
    #[serde(default)]
    pub mode: ConditionerMode,

    /// Frame-rate ceiling in fps (default: 30)
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,

    /// Scale frame rate together with bitrate (default: false)
    #[serde(default)]
    pub adaptive_fps: bool,

    /// Override of the strategy's first-tick delay, 0 disables polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_delay_ms: Option<u64>,

    /// Override of the strategy's tick interval, 0 disables polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

fn default_max_fps() -> u32 {
    30
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            mode: ConditionerMode::Off,
            max_fps: default_max_fps(),
            adaptive_fps: false,
            poll_delay_ms: None,
            poll_interval_ms: None,
        }
    }
}

impl ConditionerConfig {
    /// Create a config for the given mode with default tuning
    pub fn new(mode: ConditionerMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Resolve the polling cadence, applying any overrides on top of the strategy's own
    pub fn poll_timing(&self, strategy_default: PollTiming) -> PollTiming {
        PollTiming {
            delay: self
                .poll_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(strategy_default.delay),
            interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(strategy_default.interval),
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConditionerError> {
        if !path.exists() {
            return Err(ConditionerError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConditionerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConditionerError> {
        if self.max_fps == 0 {
            return Err(ConditionerError::Invalid("max_fps must be at least 1".into()));
        }
        Ok(())
    }
}
