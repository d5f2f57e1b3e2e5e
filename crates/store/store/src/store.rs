use std::sync::Arc;

use blobgate_core::{BlobDescriptor, ObjectId, PoolName};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument, warn};

use crate::attrs::{
    FILENAME_ATTR, LOCK_NAME, TTL_ATTR, decode_filename, decode_ttl, expiry_after,
};
use crate::backend::{ObjectBackend, PoolContext};
use crate::blob::{BlobHandle, BlobLock};
use crate::config::StoreConfig;
use crate::error::{BackendError, StoreError};

/// Object store adapter: blob-level operations over a pluggable backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    config: Arc<StoreConfig>,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// The pool that holds (or will hold) `id`.
    #[must_use]
    pub fn pool_for(&self, id: &ObjectId) -> PoolName {
        PoolName::for_object(&self.config.pool_prefix, id)
    }

    /// Whether `pool` carries this store's prefix.
    #[must_use]
    pub fn owns_pool(&self, pool: &PoolName) -> bool {
        pool.starts_with(&self.config.pool_prefix)
    }

    /// Allocate a fresh id, create its pool if needed and open a handle.
    ///
    /// Nothing is written yet; the object comes into existence on the first
    /// [`BlobHandle::write_chunk`].
    #[instrument(skip(self))]
    pub async fn create_new(&self, filename: &str) -> Result<BlobHandle, StoreError> {
        let id = ObjectId::new_random();
        let pool = self.pool_for(&id);
        self.backend
            .create_pool(&pool)
            .await
            .map_err(StoreError::Storage)?;
        let ctx = self
            .backend
            .open_pool(&pool)
            .await
            .map_err(StoreError::Storage)?;
        let ttl = expiry_after(Utc::now(), self.config.object_ttl);
        debug!(object_id = %id, pool = %pool, "blob allocated");
        Ok(BlobHandle::new(ctx, id, filename.to_owned(), ttl, 0))
    }

    /// Open a stored blob for reading.
    ///
    /// Fails with [`StoreError::NotFound`] when the pool, the object or its
    /// TTL attribute is missing or unreadable.
    #[instrument(skip(self))]
    pub async fn open_existing(
        &self,
        pool: &PoolName,
        id: &ObjectId,
    ) -> Result<BlobHandle, StoreError> {
        let ctx = self.backend.open_pool(pool).await?;
        // Constructed before any lookups so every error path below closes
        // the context on drop.
        let mut handle = BlobHandle::new(ctx, *id, String::new(), Utc::now(), 0);
        let object = id.to_string();
        let ctx = Arc::clone(handle.context());

        let stat = ctx.stat(&object).await?;
        let ttl = ctx
            .get_xattr(&object, TTL_ATTR)
            .await?
            .and_then(|raw| decode_ttl(&raw))
            .ok_or_else(|| StoreError::NotFound(format!("{pool}/{object}: missing TTL")))?;
        let filename = match ctx.get_xattr(&object, FILENAME_ATTR).await {
            Ok(raw) => raw.map(|raw| decode_filename(&raw)).unwrap_or_default(),
            Err(e) => {
                warn!(object_id = %id, pool = %pool, error = %e, "unreadable filename attribute");
                String::new()
            }
        };
        handle.set_loaded(stat.size, ttl, filename);
        Ok(handle)
    }

    /// Every pool known to the backend, including foreign ones.
    pub async fn list_pools(&self) -> Result<Vec<PoolName>, StoreError> {
        self.backend.list_pools().await.map_err(StoreError::Storage)
    }

    /// Open a pool-wide view for scanning and removal.
    pub async fn open_pool_view(&self, pool: &PoolName) -> Result<PoolView, StoreError> {
        let ctx = self.backend.open_pool(pool).await?;
        Ok(PoolView { ctx })
    }

    /// Store the whole of `reader` as a new blob.
    ///
    /// The blob is locked for the duration of the copy and its attributes
    /// are set once all bytes are in. The lease is renewed after every read.
    /// On failure the partial blob is removed.
    #[instrument(skip(self, reader))]
    pub async fn write_all<R>(&self, filename: &str, reader: R) -> Result<BlobDescriptor, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut handle = self.create_new(filename).await?;
        let lock = match handle.acquire_lock(self.config.lock_lease).await {
            Ok(lock) => lock,
            Err(e) => {
                handle.destroy();
                return Err(e);
            }
        };

        let copied = self.copy_into(&mut handle, &lock, reader).await;
        let released = lock.release().await;
        let result = match (copied, released) {
            (Ok(()), Ok(())) => Ok(handle.descriptor()),
            (Err(e), _) | (Ok(()), Err(e)) => {
                if let Err(cleanup) = handle.discard().await {
                    warn!(object_id = %handle.id(), error = %cleanup, "failed to remove partial blob");
                }
                Err(e)
            }
        };
        handle.destroy();
        result
    }

    async fn copy_into<R>(
        &self,
        handle: &mut BlobHandle,
        lock: &BlobLock,
        mut reader: R,
    ) -> Result<(), StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; self.config.io_buffer_size.max(1)];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| StoreError::Storage(BackendError::Io(e)))?;
            lock.renew().await?;
            if n == 0 {
                break;
            }
            handle.write_chunk(&buf[..n]).await?;
        }
        if handle.size() == 0 {
            // An empty upload still yields an (empty) object.
            handle.write_chunk(&[]).await?;
        }
        handle.set_attributes().await
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Pool-wide access used by scanners. The context is released on drop.
pub struct PoolView {
    ctx: Arc<dyn PoolContext>,
}

impl PoolView {
    #[must_use]
    pub fn pool(&self) -> &PoolName {
        self.ctx.pool()
    }

    pub async fn list_objects(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.ctx.list_objects().await?)
    }

    /// The object's expiry, or `None` if it has no readable TTL attribute.
    pub async fn object_ttl(&self, object: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = self.ctx.get_xattr(object, TTL_ATTR).await?;
        Ok(raw.and_then(|raw| decode_ttl(&raw)))
    }

    pub async fn is_locked(&self, object: &str) -> Result<bool, StoreError> {
        let lockers = self.ctx.list_lockers(object, LOCK_NAME).await?;
        Ok(!lockers.is_empty())
    }

    /// Remove an object without consulting its lock.
    pub async fn remove(&self, object: &str) -> Result<(), StoreError> {
        Ok(self.ctx.remove(object).await?)
    }
}

impl Drop for PoolView {
    fn drop(&mut self) {
        self.ctx.close();
    }
}
