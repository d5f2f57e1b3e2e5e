use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use blobgate_core::PoolName;
use blobgate_store::{
    BackendError, LockOutcome, LockSpec, LockTable, Locker, ObjectBackend, ObjectStat,
    PoolContext,
};
use bytes::Bytes;
use dashmap::DashMap;

#[derive(Debug, Default)]
struct MemoryObject {
    data: Vec<u8>,
    xattrs: HashMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct MemoryPool {
    objects: DashMap<String, MemoryObject>,
    locks: LockTable,
}

#[derive(Debug, Default)]
struct Shared {
    pools: DashMap<PoolName, Arc<MemoryPool>>,
    open_contexts: AtomicUsize,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    fail_unlocks: AtomicBool,
}

/// In-memory [`ObjectBackend`] backed by [`DashMap`]s.
///
/// Clones share state. Intended for tests and ephemeral deployments; all
/// content is lost when the last clone is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pool contexts opened and not yet closed.
    pub fn open_contexts(&self) -> usize {
        self.shared.open_contexts.load(Ordering::SeqCst)
    }

    /// Make every subsequent content, attribute or pool-creation write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent object removal fail.
    pub fn fail_removes(&self, fail: bool) {
        self.shared.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent unlock fail, leaving the lock held.
    pub fn fail_unlocks(&self, fail: bool) {
        self.shared.fail_unlocks.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn list_pools(&self) -> Result<Vec<PoolName>, BackendError> {
        let mut pools: Vec<PoolName> = self.shared.pools.iter().map(|e| e.key().clone()).collect();
        pools.sort();
        Ok(pools)
    }

    async fn create_pool(&self, pool: &PoolName) -> Result<(), BackendError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) && !self.shared.pools.contains_key(pool) {
            return Err(BackendError::Backend("injected write failure".to_owned()));
        }
        self.shared.pools.entry(pool.clone()).or_default();
        Ok(())
    }

    async fn open_pool(&self, pool: &PoolName) -> Result<Arc<dyn PoolContext>, BackendError> {
        let data = self
            .shared
            .pools
            .get(pool)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BackendError::NotFound(format!("pool {pool}")))?;
        self.shared.open_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryContext {
            name: pool.clone(),
            data,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryContext {
    name: PoolName,
    data: Arc<MemoryPool>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryContext {
    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("context for pool {} is closed", self.name)));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), BackendError> {
        self.check_open()?;
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Backend("injected write failure".to_owned()));
        }
        Ok(())
    }

    fn missing(&self, object: &str) -> BackendError {
        BackendError::NotFound(format!("object {}/{object}", self.name))
    }
}

fn to_index(offset: u64) -> Result<usize, BackendError> {
    usize::try_from(offset).map_err(|_| BackendError::Backend(format!("offset {offset} out of range")))
}

#[async_trait]
impl PoolContext for MemoryContext {
    fn pool(&self) -> &PoolName {
        &self.name
    }

    async fn stat(&self, object: &str) -> Result<ObjectStat, BackendError> {
        self.check_open()?;
        let entry = self.data.objects.get(object).ok_or_else(|| self.missing(object))?;
        Ok(ObjectStat {
            size: entry.data.len() as u64,
        })
    }

    async fn read_at(&self, object: &str, offset: u64, len: usize) -> Result<Bytes, BackendError> {
        self.check_open()?;
        let entry = self.data.objects.get(object).ok_or_else(|| self.missing(object))?;
        let size = entry.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(size);
        let end = start.saturating_add(len).min(size);
        Ok(Bytes::copy_from_slice(&entry.data[start..end]))
    }

    async fn write_full(&self, object: &str, data: &[u8]) -> Result<(), BackendError> {
        self.check_writable()?;
        let mut entry = self.data.objects.entry(object.to_owned()).or_default();
        entry.data.clear();
        entry.data.extend_from_slice(data);
        Ok(())
    }

    async fn write_at(&self, object: &str, offset: u64, data: &[u8]) -> Result<(), BackendError> {
        self.check_writable()?;
        let start = to_index(offset)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| BackendError::Backend(format!("write at {offset} out of range")))?;
        let mut entry = self.data.objects.entry(object.to_owned()).or_default();
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn get_xattr(&self, object: &str, name: &str) -> Result<Option<Bytes>, BackendError> {
        self.check_open()?;
        let entry = self.data.objects.get(object).ok_or_else(|| self.missing(object))?;
        Ok(entry.xattrs.get(name).cloned())
    }

    async fn set_xattr(&self, object: &str, name: &str, value: &[u8]) -> Result<(), BackendError> {
        self.check_writable()?;
        let mut entry = self
            .data
            .objects
            .get_mut(object)
            .ok_or_else(|| self.missing(object))?;
        entry
            .xattrs
            .insert(name.to_owned(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<String>, BackendError> {
        self.check_open()?;
        Ok(self.data.objects.iter().map(|e| e.key().clone()).collect())
    }

    async fn lock_exclusive(
        &self,
        object: &str,
        spec: &LockSpec,
    ) -> Result<LockOutcome, BackendError> {
        self.check_open()?;
        Ok(self.data.locks.lock_exclusive(object, spec))
    }

    async fn unlock(&self, object: &str, name: &str, cookie: &str) -> Result<(), BackendError> {
        self.check_open()?;
        if self.shared.fail_unlocks.load(Ordering::SeqCst) {
            return Err(BackendError::Backend("injected unlock failure".to_owned()));
        }
        self.data.locks.unlock(object, name, cookie)
    }

    async fn list_lockers(&self, object: &str, name: &str) -> Result<Vec<Locker>, BackendError> {
        self.check_open()?;
        Ok(self.data.locks.lockers(object, name))
    }

    async fn remove(&self, object: &str) -> Result<(), BackendError> {
        self.check_open()?;
        if self.shared.fail_removes.load(Ordering::SeqCst) {
            return Err(BackendError::Backend("injected remove failure".to_owned()));
        }
        self.data
            .objects
            .remove(object)
            .ok_or_else(|| self.missing(object))?;
        self.data.locks.remove_object(object);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.open_contexts.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use blobgate_core::ErrorKind;
    use blobgate_store::testing::{run_adapter_conformance_tests, run_backend_conformance_tests};
    use blobgate_store::{ObjectStore, StoreConfig, StoreError};
    use chrono::{TimeDelta, Utc};

    use super::*;

    fn store(backend: &MemoryBackend) -> ObjectStore {
        ObjectStore::new(Arc::new(backend.clone()), StoreConfig::default())
    }

    #[tokio::test]
    async fn backend_conformance() {
        let backend = MemoryBackend::new();
        run_backend_conformance_tests(&backend)
            .await
            .expect("backend conformance tests should pass");
        assert_eq!(backend.open_contexts(), 0, "suite closes every context");
    }

    #[tokio::test]
    async fn adapter_conformance() {
        let backend = MemoryBackend::new();
        run_adapter_conformance_tests(Arc::new(backend.clone()))
            .await
            .expect("adapter conformance tests should pass");
        assert_eq!(backend.open_contexts(), 0, "adapter releases every context");
    }

    #[tokio::test]
    async fn failed_open_releases_context() {
        let backend = MemoryBackend::new();
        let store = store(&backend);

        let mut handle = store.create_new("f").await.unwrap();
        handle.write_chunk(b"no ttl yet").await.unwrap();
        let (pool, id) = (handle.pool().clone(), *handle.id());
        assert_eq!(backend.open_contexts(), 1);
        handle.destroy();

        assert!(store.open_existing(&pool, &id).await.is_err());
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test]
    async fn dropped_handle_releases_context() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        {
            let _handle = store.create_new("f").await.unwrap();
            assert_eq!(backend.open_contexts(), 1);
        }
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test]
    async fn injected_write_failure_surfaces_as_storage_error() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let mut handle = store.create_new("f").await.unwrap();

        backend.fail_writes(true);
        let err = handle.write_chunk(b"data").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(handle.size(), 0, "failed write does not move the cursor");

        backend.fail_writes(false);
        assert_eq!(handle.write_chunk(b"data").await.unwrap(), 4);
        handle.destroy();
    }

    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("client went away")))
        }
    }

    #[tokio::test]
    async fn write_all_failure_removes_partial_blob() {
        use tokio::io::AsyncReadExt;

        let backend = MemoryBackend::new();
        let store = store(&backend);
        let reader = (&b"payload"[..]).chain(FailingReader);

        let err = store.write_all("f", reader).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(backend.open_contexts(), 0);
        let pools = backend.list_pools().await.unwrap();
        assert_eq!(pools.len(), 1);
        let ctx = backend.open_pool(&pools[0]).await.unwrap();
        assert!(ctx.list_objects().await.unwrap().is_empty());
        ctx.close();
    }

    #[tokio::test]
    async fn write_all_discards_blob_when_lock_release_fails() {
        let backend = MemoryBackend::new();
        let store = store(&backend);

        backend.fail_unlocks(true);
        let err = store.write_all("f", &b"payload"[..]).await.unwrap_err();
        backend.fail_unlocks(false);

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(backend.open_contexts(), 0);
        let pools = backend.list_pools().await.unwrap();
        let ctx = backend.open_pool(&pools[0]).await.unwrap();
        assert!(ctx.list_objects().await.unwrap().is_empty());
        ctx.close();
    }

    #[tokio::test]
    async fn pool_creation_honours_injected_failure() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        backend.fail_writes(true);
        let err = store.create_new("f").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_lease_lapses_without_renewal() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let mut handle = store.create_new("f").await.unwrap();
        handle.write_chunk(b"x").await.unwrap();

        let lock = handle.acquire_lock(Some(Duration::from_secs(60))).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        lock.renew().await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(lock.is_held().await.unwrap(), "renewal restarted the lease");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!lock.is_held().await.unwrap());
        assert!(!handle.is_locked().await.unwrap());
        handle.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn write_all_survives_reader_slower_than_lease() {
        use tokio::io::AsyncWriteExt;

        let backend = MemoryBackend::new();
        let config = StoreConfig {
            lock_lease: Some(Duration::from_secs(60)),
            ..StoreConfig::default()
        };
        let store = ObjectStore::new(Arc::new(backend.clone()), config);
        let (mut tx, rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            tx.write_all(b"first ").await.unwrap();
            tokio::time::sleep(Duration::from_secs(61)).await;
            tx.write_all(b"second").await.unwrap();
            tokio::time::sleep(Duration::from_secs(61)).await;
        });

        let desc = store.write_all("slow.bin", rx).await.unwrap();
        writer.await.unwrap();
        assert_eq!(desc.size, 12);

        let handle = store.open_existing(&desc.pool, &desc.object_id).await.unwrap();
        assert!(!handle.is_locked().await.unwrap(), "lock released after the copy");
        assert_eq!(&handle.read_range(0, 64).await.unwrap()[..], b"first second");
        handle.destroy();
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test]
    async fn expired_ttl_is_visible_through_pool_view() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let mut handle = store.create_new("f").await.unwrap();
        handle.write_chunk(b"x").await.unwrap();
        handle.set_attributes().await.unwrap();
        handle.set_ttl(Utc::now() - TimeDelta::seconds(1)).await.unwrap();

        let view = store.open_pool_view(handle.pool()).await.unwrap();
        let ttl = view
            .object_ttl(&handle.id().to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(ttl < Utc::now());
        drop(view);
        handle.destroy();
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test]
    async fn open_existing_on_foreign_pool_is_not_found() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let err = store
            .open_existing(&PoolName::from("elsewhere"), &blobgate_core::ObjectId::new_random())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
