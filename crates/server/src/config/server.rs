use serde::Deserialize;

/// Process-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Maximum time to wait for roles to stop after a shutdown signal.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    30
}
