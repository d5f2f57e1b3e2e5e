use std::time::Duration;

use blobgate_core::wire::DEFAULT_MAX_FRAME_SIZE;

/// Parameters of the [`crate::UploadBroker`].
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Number of workers servicing the shared queue.
    pub workers: usize,
    /// Sessions without traffic for this long are torn down.
    pub idle_timeout: Duration,
    /// How often the reaper looks for idle sessions.
    pub reap_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            idle_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Parameters of the [`crate::DownloadServer`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Largest chunk a single request may ask for.
    pub max_chunk_size: usize,
    /// Requests a client may keep outstanding.
    pub credit_window: usize,
    pub max_frame_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1024 * 1024,
            credit_window: 10,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl DownloadConfig {
    /// Replies buffered per peer: twice the credit window.
    #[must_use]
    pub fn reply_queue_depth(&self) -> usize {
        self.credit_window.max(1).saturating_mul(2)
    }
}
