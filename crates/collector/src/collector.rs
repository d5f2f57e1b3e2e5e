//! Periodic removal of expired blobs.
//!
//! Each tick walks every pool carrying the store's prefix and removes
//! objects whose TTL has passed and whose lock nobody holds. Objects
//! without a TTL attribute (uploads still in flight) are never touched.
//!
//! The lock check and the removal are two separate backend calls, so an
//! uploader can take the lock in between. Object ids are never reused, so
//! the worst case is the removal of a blob whose TTL already ran out.

use std::time::Duration;

use blobgate_core::PoolName;
use blobgate_store::{ObjectStore, PoolView, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::error::CollectorError;

/// Configuration for the [`GarbageCollector`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between sweeps (default: 60 seconds).
    pub interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pools_scanned: u64,
    pub objects_scanned: u64,
    pub deleted: u64,
    /// Objects with no TTL attribute.
    pub skipped_no_ttl: u64,
    /// Expired objects left alone because their lock is held.
    pub skipped_locked: u64,
    /// Backend failures; each one skipped an object or a pool.
    pub failures: u64,
}

/// Background loop deleting expired, unlocked blobs.
pub struct GarbageCollector {
    store: ObjectStore,
    config: CollectorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    /// Channel to send sweep reports.
    report_tx: Option<mpsc::Sender<SweepReport>>,
}

impl GarbageCollector {
    pub fn new(store: ObjectStore, config: CollectorConfig, shutdown_rx: mpsc::Receiver<()>) -> Self {
        Self {
            store,
            config,
            shutdown_rx,
            report_tx: None,
        }
    }

    /// Set a channel to receive a report after every sweep.
    #[must_use]
    pub fn with_report_channel(mut self, tx: mpsc::Sender<SweepReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// Run until shutdown is signaled or the shutdown sender is dropped.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(&mut self) {
        info!(interval_secs = self.config.interval.as_secs(), "garbage collector starting");

        let mut ticker = interval(self.config.interval.max(Duration::from_millis(10)));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("garbage collector received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if let Some(tx) = &self.report_tx {
                        let _ = tx.try_send(report);
                    }
                }
            }
        }

        info!("garbage collector stopped");
    }

    /// Run one full pass over every owned pool.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();

        let pools = match self.store.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                error!(error = %CollectorError::ListPools(e), "sweep aborted");
                report.failures += 1;
                return report;
            }
        };

        for pool in pools.iter().filter(|p| self.store.owns_pool(p)) {
            if let Err(e) = self.sweep_pool(pool, now, &mut report).await {
                warn!(error = %e, "pool skipped");
                report.failures += 1;
            }
        }

        if report.deleted > 0 || report.failures > 0 {
            info!(
                pools = report.pools_scanned,
                objects = report.objects_scanned,
                deleted = report.deleted,
                locked = report.skipped_locked,
                failures = report.failures,
                "sweep finished"
            );
        } else {
            debug!(pools = report.pools_scanned, objects = report.objects_scanned, "sweep finished");
        }
        report
    }

    async fn sweep_pool(
        &self,
        pool: &PoolName,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), CollectorError> {
        let pool_error = |source: StoreError| CollectorError::Pool {
            pool: pool.to_string(),
            source,
        };
        let view = self.store.open_pool_view(pool).await.map_err(pool_error)?;
        let objects = view.list_objects().await.map_err(pool_error)?;
        report.pools_scanned += 1;

        for object in objects {
            report.objects_scanned += 1;
            if let Err(e) = collect_object(&view, &object, now, report).await {
                // The object vanished mid-scan.
                if matches!(e, StoreError::NotFound(_)) {
                    continue;
                }
                warn!(pool = %pool, object = %object, error = %e, "failed to collect object");
                report.failures += 1;
            }
        }
        Ok(())
    }
}

async fn collect_object(
    view: &PoolView,
    object: &str,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<(), StoreError> {
    let Some(ttl) = view.object_ttl(object).await? else {
        report.skipped_no_ttl += 1;
        return Ok(());
    };
    if now <= ttl {
        return Ok(());
    }
    if view.is_locked(object).await? {
        debug!(pool = %view.pool(), object, "expired but locked");
        report.skipped_locked += 1;
        return Ok(());
    }
    view.remove(object).await?;
    info!(pool = %view.pool(), object, expired_at = %ttl, "expired blob deleted");
    report.deleted += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blobgate_core::ObjectId;
    use blobgate_store::{ObjectBackend, StoreConfig};
    use blobgate_store_memory::MemoryBackend;
    use chrono::TimeDelta;

    use super::*;

    // -- Helpers ---------------------------------------------------------

    fn store(backend: &MemoryBackend) -> ObjectStore {
        ObjectStore::new(Arc::new(backend.clone()), StoreConfig::default())
    }

    fn collector(store: &ObjectStore) -> (GarbageCollector, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            GarbageCollector::new(store.clone(), CollectorConfig::default(), rx),
            tx,
        )
    }

    /// Store a finished blob whose TTL is `ttl_offset` from now.
    async fn blob(store: &ObjectStore, ttl_offset: TimeDelta) -> (PoolName, ObjectId) {
        let desc = store.write_all("blob.bin", &b"content"[..]).await.unwrap();
        let mut handle = store.open_existing(&desc.pool, &desc.object_id).await.unwrap();
        handle.set_ttl(Utc::now() + ttl_offset).await.unwrap();
        handle.destroy();
        (desc.pool, desc.object_id)
    }

    async fn exists(store: &ObjectStore, pool: &PoolName, id: &ObjectId) -> bool {
        let view = store.open_pool_view(pool).await.unwrap();
        view.list_objects().await.unwrap().contains(&id.to_string())
    }

    // -- Sweep -----------------------------------------------------------

    #[tokio::test]
    async fn expired_unlocked_blob_is_deleted() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let (pool, id) = blob(&store, TimeDelta::seconds(-1)).await;
        let (gc, _tx) = collector(&store);

        let report = gc.sweep().await;
        assert_eq!(report.deleted, 1);
        assert!(!exists(&store, &pool, &id).await);
        assert_eq!(backend.open_contexts(), 0);
    }

    #[tokio::test]
    async fn locked_blob_survives_until_unlocked() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let (pool, id) = blob(&store, TimeDelta::seconds(-1)).await;
        let holder = store.open_existing(&pool, &id).await.unwrap();
        let lock = holder.acquire_lock(None).await.unwrap();
        let (gc, _tx) = collector(&store);

        let report = gc.sweep().await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped_locked, 1);
        assert!(exists(&store, &pool, &id).await);

        lock.release().await.unwrap();
        holder.destroy();
        assert_eq!(gc.sweep().await.deleted, 1);
        assert!(!exists(&store, &pool, &id).await);
    }

    #[tokio::test]
    async fn unexpired_and_unfinished_blobs_are_kept() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let (live_pool, live_id) = blob(&store, TimeDelta::hours(1)).await;

        let mut in_flight = store.create_new("partial.bin").await.unwrap();
        in_flight.write_chunk(b"half").await.unwrap();
        let (gc, _tx) = collector(&store);

        let report = gc.sweep().await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped_no_ttl, 1);
        assert!(exists(&store, &live_pool, &live_id).await);
        assert!(exists(&store, in_flight.pool(), in_flight.id()).await);
        in_flight.destroy();
    }

    #[tokio::test]
    async fn foreign_pools_are_not_scanned() {
        let backend = MemoryBackend::new();
        let foreign = PoolName::from("someone-else");
        backend.create_pool(&foreign).await.unwrap();
        let ctx = backend.open_pool(&foreign).await.unwrap();
        ctx.write_full("obj", b"x").await.unwrap();
        ctx.set_xattr("obj", "TTL", &0i64.to_le_bytes()).await.unwrap();

        let store = store(&backend);
        let (gc, _tx) = collector(&store);
        let report = gc.sweep().await;
        assert_eq!(report.pools_scanned, 0);
        assert_eq!(ctx.list_objects().await.unwrap(), vec!["obj".to_owned()]);
        ctx.close();
    }

    #[tokio::test]
    async fn delete_failure_is_counted_and_scan_continues() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        blob(&store, TimeDelta::seconds(-5)).await;
        blob(&store, TimeDelta::seconds(-5)).await;
        let (gc, _tx) = collector(&store);

        backend.fail_removes(true);
        let report = gc.sweep().await;
        assert_eq!(report.objects_scanned, 2);
        assert_eq!(report.failures, 2);
        assert_eq!(report.deleted, 0);

        backend.fail_removes(false);
        assert_eq!(gc.sweep().await.deleted, 2, "next sweep retries naturally");
    }

    #[tokio::test]
    async fn sweeping_twice_is_idempotent() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        blob(&store, TimeDelta::seconds(-1)).await;
        let (gc, _tx) = collector(&store);
        assert_eq!(gc.sweep().await.deleted, 1);
        let second = gc.sweep().await;
        assert_eq!(second.deleted, 0);
        assert_eq!(second.failures, 0);
    }

    // -- Loop ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_every_interval_until_shutdown() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let (pool, id) = blob(&store, TimeDelta::seconds(-1)).await;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::channel(4);
        let mut gc = GarbageCollector::new(
            store.clone(),
            CollectorConfig {
                interval: Duration::from_secs(10),
            },
            shutdown_rx,
        )
        .with_report_channel(report_tx);
        let task = tokio::spawn(async move { gc.run().await });

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!exists(&store, &pool, &id).await);

        shutdown_tx.send(()).await.unwrap();
        task.await.unwrap();
    }
}
