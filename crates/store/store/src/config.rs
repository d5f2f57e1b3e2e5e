use std::time::Duration;

/// Parameters consumed by [`crate::ObjectStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix of every pool name managed by this store.
    pub pool_prefix: String,
    /// Lifetime given to newly written blobs.
    pub object_ttl: Duration,
    /// Lease attached to upload locks; `None` holds locks until released.
    pub lock_lease: Option<Duration>,
    /// Read size when copying a stream into a blob.
    pub io_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_prefix: "blobgate-".to_owned(),
            object_ttl: Duration::from_secs(3600),
            lock_lease: Some(Duration::from_secs(60)),
            io_buffer_size: 8192,
        }
    }
}
