use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blobgate_core::PoolName;
use bytes::Bytes;

use crate::error::BackendError;

/// Size information for one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
}

/// Parameters of an exclusive lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSpec {
    pub name: String,
    /// Opaque holder identity.
    pub cookie: String,
    /// Lease after which the lock lapses on its own. `None` never lapses.
    pub lease: Option<Duration>,
    /// Re-acquire a lock already held under the same cookie, restarting
    /// its lease. Without this flag a second acquisition by the same
    /// cookie reports [`LockOutcome::Busy`].
    pub renew: bool,
}

/// Result of [`PoolContext::lock_exclusive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Busy,
}

/// A current holder of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locker {
    pub cookie: String,
}

/// Entry point of a storage backend: pool management.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn list_pools(&self) -> Result<Vec<PoolName>, BackendError>;

    /// Create a pool. Creating a pool that already exists succeeds.
    async fn create_pool(&self, pool: &PoolName) -> Result<(), BackendError>;

    /// Open an I/O context on an existing pool.
    ///
    /// Returns [`BackendError::NotFound`] if the pool does not exist. The
    /// returned context must be closed with [`PoolContext::close`].
    async fn open_pool(&self, pool: &PoolName) -> Result<Arc<dyn PoolContext>, BackendError>;
}

/// Per-pool I/O context exposing object, attribute and lock primitives.
///
/// Objects are addressed by name. Writes create objects on demand; reads,
/// attribute access and removal of a missing object report
/// [`BackendError::NotFound`]. Locks live independently of object content,
/// so a lock may be taken before the first write.
#[async_trait]
pub trait PoolContext: Send + Sync {
    fn pool(&self) -> &PoolName;

    async fn stat(&self, object: &str) -> Result<ObjectStat, BackendError>;

    /// Read up to `len` bytes at `offset`. Reading at or past the end
    /// returns fewer (possibly zero) bytes.
    async fn read_at(&self, object: &str, offset: u64, len: usize) -> Result<Bytes, BackendError>;

    /// Replace the entire content of an object.
    async fn write_full(&self, object: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Write at `offset`, extending the object as needed.
    async fn write_at(&self, object: &str, offset: u64, data: &[u8]) -> Result<(), BackendError>;

    /// Read an attribute. `Ok(None)` when the object exists without it.
    async fn get_xattr(&self, object: &str, name: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set_xattr(&self, object: &str, name: &str, value: &[u8]) -> Result<(), BackendError>;

    async fn list_objects(&self) -> Result<Vec<String>, BackendError>;

    async fn lock_exclusive(&self, object: &str, spec: &LockSpec)
    -> Result<LockOutcome, BackendError>;

    /// Release a lock. Returns [`BackendError::NotFound`] if `cookie` does
    /// not hold it.
    async fn unlock(&self, object: &str, name: &str, cookie: &str) -> Result<(), BackendError>;

    /// Current, unexpired holders of a lock.
    async fn list_lockers(&self, object: &str, name: &str) -> Result<Vec<Locker>, BackendError>;

    /// Remove an object with its attributes and locks. Lock state is not
    /// consulted.
    async fn remove(&self, object: &str) -> Result<(), BackendError>;

    /// Release the context. Idempotent; later operations fail with
    /// [`BackendError::Unavailable`].
    fn close(&self);
}
