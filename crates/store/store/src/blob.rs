use std::sync::Arc;
use std::time::Duration;

use blobgate_core::{BlobDescriptor, ObjectId, PoolName};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::attrs::{FILENAME_ATTR, LOCK_NAME, TTL_ATTR, bounded_filename, encode_ttl};
use crate::backend::{LockOutcome, LockSpec, PoolContext};
use crate::error::StoreError;

/// An open blob: one object in one pool plus the context used to reach it.
///
/// The handle tracks a write cursor. The first [`write_chunk`] replaces the
/// object's content; every later one writes at the cursor. The pool
/// context is released by [`destroy`] or, failing that, on drop.
///
/// [`write_chunk`]: BlobHandle::write_chunk
/// [`destroy`]: BlobHandle::destroy
pub struct BlobHandle {
    ctx: Arc<dyn PoolContext>,
    pool: PoolName,
    id: ObjectId,
    object: String,
    filename: String,
    ttl: DateTime<Utc>,
    size: u64,
    written: bool,
    closed: bool,
}

impl BlobHandle {
    pub(crate) fn new(
        ctx: Arc<dyn PoolContext>,
        id: ObjectId,
        filename: String,
        ttl: DateTime<Utc>,
        size: u64,
    ) -> Self {
        Self {
            pool: ctx.pool().clone(),
            object: id.to_string(),
            ctx,
            id,
            filename,
            ttl,
            size,
            written: size > 0,
            closed: false,
        }
    }

    pub(crate) fn context(&self) -> &Arc<dyn PoolContext> {
        &self.ctx
    }

    pub(crate) fn set_loaded(&mut self, size: u64, ttl: DateTime<Utc>, filename: String) {
        self.size = size;
        self.written = true;
        self.ttl = ttl;
        self.filename = filename;
    }

    #[must_use]
    pub fn pool(&self) -> &PoolName {
        &self.pool
    }

    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn ttl(&self) -> DateTime<Utc> {
        self.ttl
    }

    /// Bytes written through this handle, or the stored size for a handle
    /// opened on an existing blob.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn descriptor(&self) -> BlobDescriptor {
        BlobDescriptor {
            pool: self.pool.clone(),
            object_id: self.id,
            size: self.size,
            ttl: self.ttl,
            filename: (!self.filename.is_empty()).then(|| self.filename.clone()),
            uri: BlobDescriptor::download_uri(&self.pool, &self.id),
        }
    }

    /// Write `data` and return the new cursor position.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        if self.written {
            self.ctx.write_at(&self.object, self.size, data).await?;
            self.size += data.len() as u64;
        } else {
            self.ctx.write_full(&self.object, data).await?;
            self.written = true;
            self.size = data.len() as u64;
        }
        Ok(self.size)
    }

    /// Read at most `len` bytes at `offset`. A short result means the end
    /// of the blob was reached.
    pub async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes, StoreError> {
        Ok(self.ctx.read_at(&self.object, offset, len).await?)
    }

    /// Persist TTL and filename. The two attribute writes are independent.
    pub async fn set_attributes(&self) -> Result<(), StoreError> {
        self.ctx
            .set_xattr(&self.object, TTL_ATTR, &encode_ttl(self.ttl))
            .await?;
        self.ctx
            .set_xattr(
                &self.object,
                FILENAME_ATTR,
                bounded_filename(&self.filename).as_bytes(),
            )
            .await?;
        Ok(())
    }

    /// Change the expiry and persist it.
    pub async fn set_ttl(&mut self, ttl: DateTime<Utc>) -> Result<(), StoreError> {
        self.ttl = ttl;
        self.ctx
            .set_xattr(&self.object, TTL_ATTR, &encode_ttl(ttl))
            .await?;
        Ok(())
    }

    /// Take the blob's exclusive lock under a fresh cookie.
    ///
    /// Fails with [`StoreError::LockConflict`] if anyone holds it; never
    /// retries.
    pub async fn acquire_lock(&self, lease: Option<Duration>) -> Result<BlobLock, StoreError> {
        let cookie = uuid::Uuid::new_v4().simple().to_string();
        let spec = LockSpec {
            name: LOCK_NAME.to_owned(),
            cookie: cookie.clone(),
            lease,
            renew: false,
        };
        match self.ctx.lock_exclusive(&self.object, &spec).await? {
            LockOutcome::Acquired => {
                debug!(object_id = %self.id, pool = %self.pool, "lock acquired");
                Ok(BlobLock {
                    ctx: Arc::clone(&self.ctx),
                    object: self.object.clone(),
                    cookie,
                    lease,
                })
            }
            LockOutcome::Busy => Err(StoreError::LockConflict(self.object.clone())),
        }
    }

    pub async fn is_locked(&self) -> Result<bool, StoreError> {
        let lockers = self.ctx.list_lockers(&self.object, LOCK_NAME).await?;
        Ok(!lockers.is_empty())
    }

    /// Remove the blob. Refused with [`StoreError::LockConflict`] while any
    /// holder, including the caller, holds its lock.
    pub async fn delete(&self) -> Result<(), StoreError> {
        if self.is_locked().await? {
            return Err(StoreError::LockConflict(self.object.clone()));
        }
        self.ctx.remove(&self.object).await?;
        debug!(object_id = %self.id, pool = %self.pool, "blob deleted");
        Ok(())
    }

    /// Remove the blob whatever the state of its lock. For a writer throwing
    /// away its own unfinished upload, whose lock may still be held.
    pub async fn discard(&self) -> Result<(), StoreError> {
        self.ctx.remove(&self.object).await?;
        debug!(object_id = %self.id, pool = %self.pool, "blob discarded");
        Ok(())
    }

    /// Release the backend context.
    pub fn destroy(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.ctx.close();
        }
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle")
            .field("pool", &self.pool)
            .field("id", &self.id)
            .field("size", &self.size)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// A held blob lock.
///
/// Must be released before the owning handle is destroyed. A lock that is
/// dropped without release stays held until its lease runs out.
pub struct BlobLock {
    ctx: Arc<dyn PoolContext>,
    object: String,
    cookie: String,
    lease: Option<Duration>,
}

impl std::fmt::Debug for BlobLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobLock")
            .field("object", &self.object)
            .field("cookie", &self.cookie)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl BlobLock {
    #[must_use]
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Restart the lease. Fails with [`StoreError::LockConflict`] if the
    /// lease already lapsed and someone else took the lock.
    pub async fn renew(&self) -> Result<(), StoreError> {
        let spec = LockSpec {
            name: LOCK_NAME.to_owned(),
            cookie: self.cookie.clone(),
            lease: self.lease,
            renew: true,
        };
        match self.ctx.lock_exclusive(&self.object, &spec).await? {
            LockOutcome::Acquired => Ok(()),
            LockOutcome::Busy => Err(StoreError::LockConflict(self.object.clone())),
        }
    }

    pub async fn is_held(&self) -> Result<bool, StoreError> {
        let lockers = self.ctx.list_lockers(&self.object, LOCK_NAME).await?;
        Ok(lockers.iter().any(|l| l.cookie == self.cookie))
    }

    pub async fn release(self) -> Result<(), StoreError> {
        self.ctx.unlock(&self.object, LOCK_NAME, &self.cookie).await?;
        Ok(())
    }
}
