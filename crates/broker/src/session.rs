use blobgate_core::{BlobDescriptor, ObjectId, PoolName, UploadChunk};
use blobgate_store::{BlobHandle, BlobLock};
use tracing::{error, warn};

use crate::error::BrokerError;

/// Result of applying one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// Bytes written so far; more are expected.
    Partial(u64),
    /// Every declared byte has been written.
    Complete(u64),
}

impl ChunkProgress {
    #[must_use]
    pub fn written(&self) -> u64 {
        match self {
            Self::Partial(n) | Self::Complete(n) => *n,
        }
    }
}

/// Server-side state of one in-progress upload.
///
/// Owns the blob handle and its lock. Once [`finalize`](Self::finalize) or
/// [`abort`](Self::abort) has run the session is closed and every further
/// chunk is refused.
pub struct UploadSession {
    handle: Option<BlobHandle>,
    lock: Option<BlobLock>,
    object_id: ObjectId,
    pool: PoolName,
    expected_size: u64,
    written: u64,
}

impl UploadSession {
    pub fn new(handle: BlobHandle, lock: BlobLock, expected_size: u64) -> Self {
        Self {
            object_id: *handle.id(),
            pool: handle.pool().clone(),
            handle: Some(handle),
            lock: Some(lock),
            expected_size,
            written: 0,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn pool(&self) -> &PoolName {
        &self.pool
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Write one chunk at the cursor.
    ///
    /// A chunk carrying an offset must match the cursor exactly; a chunk
    /// that would run past the declared size is refused. Both leave the
    /// session untouched. Every accepted chunk renews the lock lease.
    pub async fn apply_chunk(&mut self, chunk: &UploadChunk) -> Result<ChunkProgress, BrokerError> {
        let handle = self.handle.as_mut().ok_or(BrokerError::SessionClosed)?;
        if let Some(offset) = chunk.offset {
            if offset != self.written {
                return Err(BrokerError::OffsetMismatch {
                    expected: self.written,
                    got: offset,
                });
            }
        }
        let len = chunk.payload.len() as u64;
        if len == 0 {
            return Err(BrokerError::EmptyChunk);
        }
        if self
            .written
            .checked_add(len)
            .is_none_or(|end| end > self.expected_size)
        {
            return Err(BrokerError::Overflow {
                written: self.written,
                len,
                expected: self.expected_size,
            });
        }

        if let Some(lock) = &self.lock {
            lock.renew().await?;
        }
        self.written = handle.write_chunk(&chunk.payload).await?;

        Ok(if self.written == self.expected_size {
            ChunkProgress::Complete(self.written)
        } else {
            ChunkProgress::Partial(self.written)
        })
    }

    /// Persist attributes, release the lock and destroy the handle.
    ///
    /// If the attributes cannot be written or the lock cannot be released
    /// the blob is discarded, lock or no lock.
    pub async fn finalize(&mut self) -> Result<BlobDescriptor, BrokerError> {
        let handle = self.handle.take().ok_or(BrokerError::SessionClosed)?;
        let attributes = handle.set_attributes().await;
        let released = match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        };

        let result = match attributes.and(released) {
            Ok(()) => Ok(handle.descriptor()),
            Err(e) => {
                match handle.discard().await {
                    Ok(()) => warn!(object_id = %self.object_id, error = %e, "upload discarded at finalize"),
                    Err(cleanup) => error!(
                        object_id = %self.object_id,
                        error = %e,
                        cleanup_error = %cleanup,
                        "failed to discard unfinished blob"
                    ),
                }
                Err(e.into())
            }
        };
        handle.destroy();
        result
    }

    /// Release the lock, remove whatever was written and destroy the
    /// handle. Does nothing on a closed session.
    pub async fn abort(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release().await {
                warn!(object_id = %self.object_id, error = %e, "failed to release upload lock");
            }
        }
        if self.written > 0 {
            if let Err(e) = handle.delete().await {
                warn!(object_id = %self.object_id, error = %e, "failed to remove partial blob");
            }
        }
        handle.destroy();
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("object_id", &self.object_id)
            .field("pool", &self.pool)
            .field("expected_size", &self.expected_size)
            .field("written", &self.written)
            .field("closed", &self.is_closed())
            .finish()
    }
}
