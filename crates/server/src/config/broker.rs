use std::time::Duration;

use blobgate_broker::{DownloadConfig, UploadConfig};
use blobgate_core::wire::DEFAULT_MAX_FRAME_SIZE;
use serde::Deserialize;

/// Upload channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadServerConfig {
    /// Address the upload router binds to.
    #[serde(default = "default_upload_listen")]
    pub listen: String,

    /// Number of workers draining the upload queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sessions silent for longer than this are aborted.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// How often the idle reaper runs.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for UploadServerConfig {
    fn default() -> Self {
        Self {
            listen: default_upload_listen(),
            workers: default_workers(),
            idle_timeout_seconds: default_idle_timeout(),
            reap_interval_seconds: default_reap_interval(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl UploadServerConfig {
    pub fn broker_config(&self) -> UploadConfig {
        UploadConfig {
            workers: self.workers.max(1),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            reap_interval: Duration::from_secs(self.reap_interval_seconds),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Download channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadServerConfig {
    /// Address the download router binds to.
    #[serde(default = "default_download_listen")]
    pub listen: String,

    /// Requests a client may keep in flight. A peer with more than twice
    /// this many unread replies is disconnected.
    #[serde(default = "default_credit_window")]
    pub credit_window: usize,

    /// Largest chunk a single request may ask for.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for DownloadServerConfig {
    fn default() -> Self {
        Self {
            listen: default_download_listen(),
            credit_window: default_credit_window(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl DownloadServerConfig {
    pub fn server_config(&self) -> DownloadConfig {
        DownloadConfig {
            max_chunk_size: self.max_chunk_size.max(1),
            credit_window: self.credit_window.max(1),
            ..DownloadConfig::default()
        }
    }
}

fn default_upload_listen() -> String {
    "127.0.0.1:6666".to_owned()
}

fn default_download_listen() -> String {
    "127.0.0.1:5555".to_owned()
}

fn default_workers() -> usize {
    5
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_reap_interval() -> u64 {
    30
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_credit_window() -> usize {
    10
}

fn default_max_chunk_size() -> usize {
    1024 * 1024
}
