use std::time::Duration;

use blobgate_collector::CollectorConfig;
use serde::Deserialize;

/// Garbage collector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorServerConfig {
    /// Whether the `all` role starts the collector.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

impl Default for CollectorServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_interval(),
        }
    }
}

impl CollectorServerConfig {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.interval_seconds.max(1)),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}
