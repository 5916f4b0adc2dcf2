//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! rubric_items = 17
//!
//! [worker]
//! max_concurrent = 5
//! technique_timeout_ms = 120000
//!
//! [channel]
//! intake_capacity = 1000
//! critical_wait_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scoring::TOTAL_RUBRIC_ITEMS;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Concurrency policy for category workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum techniques in flight at once.
    pub max_concurrent: usize,
    /// Per-technique time bound.
    pub technique_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            technique_timeout_ms: 120_000,
        }
    }
}

impl WorkerConfig {
    pub fn technique_timeout(&self) -> Duration {
        Duration::from_millis(self.technique_timeout_ms)
    }
}

/// Sizing and timing of the progress channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bounded intake queue shared by all producers.
    pub intake_capacity: usize,
    /// Per-subscriber delivery queue.
    pub subscriber_capacity: usize,
    /// Events buffered per evaluation while nobody is subscribed.
    pub pending_max_events: usize,
    pub pending_max_age_ms: u64,
    /// Channels idle for longer than this are closed by the stale sweep.
    pub stale_after_ms: u64,
    /// How long a producer waits on a full intake for a critical event.
    pub critical_wait_ms: u64,
    /// How long publishing waits on one full subscriber queue.
    pub delivery_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Events moved per transfer-task iteration.
    pub batch_size: usize,
    /// Transfer-task sleep when the intake is empty.
    pub idle_poll_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 1000,
            subscriber_capacity: 100,
            pending_max_events: 50,
            pending_max_age_ms: 30_000,
            stale_after_ms: 600_000,
            critical_wait_ms: 5_000,
            delivery_timeout_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            batch_size: 32,
            idle_poll_ms: 10,
            sweep_interval_ms: 60_000,
        }
    }
}

impl ChannelConfig {
    pub fn pending_max_age(&self) -> Duration {
        Duration::from_millis(self.pending_max_age_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn critical_wait(&self) -> Duration {
        Duration::from_millis(self.critical_wait_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the fixed rubric.
    pub rubric_items: usize,
    pub worker: WorkerConfig,
    pub channel: ChannelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rubric_items: TOTAL_RUBRIC_ITEMS,
            worker: WorkerConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject values that would stall the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("worker.max_concurrent", self.worker.max_concurrent),
            ("channel.intake_capacity", self.channel.intake_capacity),
            ("channel.subscriber_capacity", self.channel.subscriber_capacity),
            ("channel.pending_max_events", self.channel.pending_max_events),
            ("channel.batch_size", self.channel.batch_size),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.worker.technique_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.technique_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.channel.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "channel.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
