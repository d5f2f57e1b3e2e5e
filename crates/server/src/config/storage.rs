use std::time::Duration;

use blobgate_store::StoreConfig;
use serde::Deserialize;

/// Configuration for the object store backend.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use: `"memory"` or `"fs"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Root directory for the `fs` backend.
    pub root: Option<String>,

    /// Prefix of every pool the gateway creates and collects.
    #[serde(default = "default_pool_prefix")]
    pub pool_prefix: String,

    /// Lifetime of a finished blob.
    #[serde(default = "default_object_ttl")]
    pub object_ttl_seconds: u64,

    /// Lease on upload locks. `0` disables expiry.
    #[serde(default = "default_lock_lease")]
    pub lock_lease_seconds: u64,

    /// Read size used when streaming blobs over HTTP.
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: None,
            pool_prefix: default_pool_prefix(),
            object_ttl_seconds: default_object_ttl(),
            lock_lease_seconds: default_lock_lease(),
            io_buffer_size: default_io_buffer_size(),
        }
    }
}

impl StorageConfig {
    /// Adapter configuration derived from this section.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            pool_prefix: self.pool_prefix.clone(),
            object_ttl: Duration::from_secs(self.object_ttl_seconds),
            lock_lease: (self.lock_lease_seconds > 0)
                .then(|| Duration::from_secs(self.lock_lease_seconds)),
            io_buffer_size: self.io_buffer_size.max(1),
        }
    }
}

fn default_backend() -> String {
    "memory".to_owned()
}

fn default_pool_prefix() -> String {
    "blobgate-".to_owned()
}

fn default_object_ttl() -> u64 {
    3600
}

fn default_lock_lease() -> u64 {
    60
}

fn default_io_buffer_size() -> usize {
    8192
}
