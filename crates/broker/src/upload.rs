use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use blobgate_core::{ErrorKind, Identity, UploadChunk, UploadHeader, UploadReply};
use blobgate_store::ObjectStore;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::config::UploadConfig;
use crate::error::BrokerError;
use crate::metrics::BrokerMetrics;
use crate::registry::{Lookup, SessionRegistry, SharedSession};
use crate::session::{ChunkProgress, UploadSession};
use crate::transport::{Inbound, ReplySender, Router};

/// Depth of the queue between the router and the dispatcher.
const INBOUND_QUEUE_DEPTH: usize = 1024;

/// Depth of each worker's own queue.
const WORKER_QUEUE_DEPTH: usize = 64;

/// Serves the chunked upload protocol.
///
/// The first message from an unregistered identity is a header and opens a
/// session; every later message from that identity is a chunk. Each
/// identity is pinned to one worker, so its messages are handled one at a
/// time in the order they arrived on the connection. Chunks that carry an
/// offset are additionally checked against the session cursor.
pub struct UploadBroker {
    store: ObjectStore,
    registry: SessionRegistry,
    metrics: Arc<BrokerMetrics>,
    config: UploadConfig,
}

impl UploadBroker {
    pub fn new(store: ObjectStore, config: UploadConfig) -> Self {
        Self {
            store,
            registry: SessionRegistry::new(),
            metrics: Arc::new(BrokerMetrics::default()),
            config,
        }
    }

    /// Share a metrics sink with other components.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<BrokerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Handle one message from `identity` and produce the reply.
    #[instrument(skip(self, frames), fields(identity = %identity))]
    pub async fn handle_message(&self, identity: &Identity, frames: &[Bytes]) -> UploadReply {
        let result = match self.registry.lookup(identity) {
            Lookup::Missing => self.open_session(identity, frames).await,
            Lookup::Pending => Err(BrokerError::SessionPending(identity.clone())),
            Lookup::Active(session) => self.apply_chunk(identity, &session, frames).await,
        };
        result.unwrap_or_else(|e| {
            self.metrics.increment_naks();
            match e.kind() {
                ErrorKind::Protocol => warn!(error = %e, "upload message rejected"),
                ErrorKind::LockConflict | ErrorKind::NotFound => {
                    warn!(error = %e, "upload session failed");
                }
                ErrorKind::Storage | ErrorKind::Transport => {
                    error!(error = %e, "upload storage failure");
                }
            }
            UploadReply::Nak
        })
    }

    async fn open_session(
        &self,
        identity: &Identity,
        frames: &[Bytes],
    ) -> Result<UploadReply, BrokerError> {
        let header = UploadHeader::decode(frames)?;
        self.registry.reserve(identity)?;
        match self.create_session(&header).await {
            Ok(session) => {
                let id = *session.object_id();
                debug!(object_id = %id, pool = %session.pool(), size = header.total_size, "upload started");
                self.registry.activate(identity, session);
                self.metrics.increment_sessions_opened();
                Ok(UploadReply::Ack(id))
            }
            Err(e) => {
                self.registry.cancel(identity);
                Err(e)
            }
        }
    }

    async fn create_session(&self, header: &UploadHeader) -> Result<UploadSession, BrokerError> {
        let handle = self.store.create_new(&header.filename).await?;
        match handle.acquire_lock(self.store.config().lock_lease).await {
            Ok(lock) => Ok(UploadSession::new(handle, lock, header.total_size)),
            Err(e) => {
                handle.destroy();
                Err(e.into())
            }
        }
    }

    async fn apply_chunk(
        &self,
        identity: &Identity,
        shared: &SharedSession,
        frames: &[Bytes],
    ) -> Result<UploadReply, BrokerError> {
        let chunk = UploadChunk::decode(frames)?;
        let mut session = shared.lock().await;
        match session.apply_chunk(&chunk).await {
            Ok(ChunkProgress::Partial(written)) => {
                self.metrics.record_chunk(chunk.payload.len() as u64);
                Ok(UploadReply::Progress(written))
            }
            Ok(ChunkProgress::Complete(written)) => {
                self.metrics.record_chunk(chunk.payload.len() as u64);
                let finalized = session.finalize().await;
                self.registry.remove(identity, shared);
                let descriptor = finalized.inspect_err(|_| {
                    self.metrics.increment_sessions_aborted();
                })?;
                info!(
                    object_id = %descriptor.object_id,
                    pool = %descriptor.pool,
                    size = descriptor.size,
                    "upload finished"
                );
                self.metrics.increment_sessions_completed();
                Ok(UploadReply::Progress(written))
            }
            Err(e) if e.ends_session() => {
                session.abort().await;
                self.registry.remove(identity, shared);
                self.metrics.increment_sessions_aborted();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down the session of a peer that went away.
    pub async fn disconnect(&self, identity: &Identity) {
        if let Some(shared) = self.registry.take(identity) {
            let mut session = shared.lock().await;
            if !session.is_closed() {
                info!(identity = %identity, object_id = %session.object_id(), "peer left mid-upload");
                session.abort().await;
                self.metrics.increment_sessions_aborted();
            }
        }
    }

    /// Abort every session idle for longer than the configured timeout.
    /// Returns the number of sessions evicted.
    pub async fn reap_idle(&self) -> usize {
        let idle = self.registry.take_idle(self.config.idle_timeout);
        let mut reaped = 0;
        for (identity, shared) in idle {
            let mut session = shared.lock().await;
            if session.is_closed() {
                continue;
            }
            info!(identity = %identity, object_id = %session.object_id(), "idle upload session reaped");
            session.abort().await;
            reaped += 1;
        }
        if reaped > 0 {
            self.metrics.add_sessions_reaped(reaped as u64);
        }
        reaped
    }

    async fn abort_all(&self) {
        for (_, shared) in self.registry.drain() {
            let mut session = shared.lock().await;
            if !session.is_closed() {
                session.abort().await;
                self.metrics.increment_sessions_aborted();
            }
        }
    }

    /// Serve uploads from `router` until `shutdown` resolves.
    ///
    /// Runs the configured number of workers and the idle reaper. Sessions
    /// still open at shutdown are aborted.
    pub async fn serve<F>(self: Arc<Self>, router: Router, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let replies = router.replies();
        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let routing = tokio::spawn(router.run(inbound_tx, shutdown));

        let workers = self.config.workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
            queues.push(tx);
            pool.spawn(Arc::clone(&self).worker(worker, rx, replies.clone()));
        }

        let (reaper_tx, reaper_rx) = mpsc::channel::<()>(1);
        let reaper = tokio::spawn(Arc::clone(&self).reap_loop(reaper_rx));
        info!(workers, "upload broker running");

        // Ends once the router has stopped and every connection task has
        // dropped its sender.
        while let Some(event) = inbound_rx.recv().await {
            let worker = worker_for(event.identity(), workers);
            if queues[worker].send(event).await.is_err() {
                error!(worker, "upload worker queue closed");
                break;
            }
        }
        drop(queues);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "upload worker failed");
            }
        }
        if let Err(e) = routing.await {
            error!(error = %e, "upload router failed");
        }
        drop(reaper_tx);
        let _ = reaper.await;

        self.abort_all().await;
        info!("upload broker stopped");
    }

    async fn worker(
        self: Arc<Self>,
        worker: usize,
        mut inbound: mpsc::Receiver<Inbound>,
        replies: ReplySender,
    ) {
        debug!(worker, "upload worker started");
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Message(envelope) => {
                    let reply = self
                        .handle_message(&envelope.identity, &envelope.frames)
                        .await;
                    if let Err(e) = replies.send(&envelope.identity, reply.encode()) {
                        debug!(worker, error = %e, "upload reply dropped");
                    }
                }
                Inbound::Disconnected(identity) => self.disconnect(&identity).await,
            }
        }
        debug!(worker, "upload worker stopped");
    }

    async fn reap_loop(self: Arc<Self>, mut stop: mpsc::Receiver<()>) {
        let mut ticker = interval(self.config.reap_interval.max(Duration::from_millis(10)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    self.reap_idle().await;
                }
            }
        }
    }
}

/// The worker that owns every message from `identity`.
fn worker_for(identity: &Identity, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    usize::try_from(hasher.finish() % workers as u64).unwrap_or(0)
}

impl std::fmt::Debug for UploadBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBroker")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use blobgate_core::protocol::encode_u64;
    use blobgate_core::{ObjectId, PoolName};
    use blobgate_store::StoreConfig;
    use blobgate_store_memory::MemoryBackend;

    use super::*;

    // -- Helpers ---------------------------------------------------------

    fn broker(backend: &MemoryBackend) -> UploadBroker {
        let store = ObjectStore::new(Arc::new(backend.clone()), StoreConfig::default());
        UploadBroker::new(store, UploadConfig::default())
    }

    fn header(name: &str, size: u64) -> Vec<Bytes> {
        UploadHeader {
            filename: name.to_owned(),
            total_size: size,
        }
        .encode()
    }

    fn bare(data: &[u8]) -> Vec<Bytes> {
        vec![Bytes::copy_from_slice(data)]
    }

    fn at(offset: u64, data: &[u8]) -> Vec<Bytes> {
        vec![encode_u64(offset), Bytes::copy_from_slice(data)]
    }

    async fn start(broker: &UploadBroker, identity: &Identity, size: u64) -> ObjectId {
        match broker.handle_message(identity, &header("f.bin", size)).await {
            UploadReply::Ack(id) => id,
            other => panic!("expected ACK, got {other:?}"),
        }
    }

    async fn pool_objects(backend: &MemoryBackend) -> Vec<String> {
        use blobgate_store::ObjectBackend;
        let mut all = Vec::new();
        for pool in backend.list_pools().await.unwrap() {
            let ctx = backend.open_pool(&pool).await.unwrap();
            all.extend(ctx.list_objects().await.unwrap());
            ctx.close();
        }
        all
    }

    // -- Protocol --------------------------------------------------------

    #[tokio::test]
    async fn chunked_upload_reports_progress_and_finalizes() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        let id = start(&broker, &identity, 62_500).await;

        let mut payload = Vec::new();
        for (i, len) in [25_000usize, 25_000, 12_500].into_iter().enumerate() {
            let chunk = vec![u8::try_from(i).unwrap(); len];
            payload.extend_from_slice(&chunk);
            let reply = broker.handle_message(&identity, &bare(&chunk)).await;
            assert_eq!(reply, UploadReply::Progress(payload.len() as u64));
        }
        assert!(broker.registry().is_empty(), "completed session is unregistered");
        assert_eq!(backend.open_contexts(), 0);

        let pool = PoolName::for_object("blobgate-", &id);
        let handle = broker.store.open_existing(&pool, &id).await.unwrap();
        assert_eq!(handle.size(), 62_500);
        assert_eq!(handle.filename(), "f.bin");
        assert!(!handle.is_locked().await.unwrap());
        assert_eq!(&handle.read_range(0, 70_000).await.unwrap()[..], &payload[..]);
        handle.destroy();

        let snap = broker.metrics().snapshot();
        assert_eq!(snap.sessions_opened, 1);
        assert_eq!(snap.sessions_completed, 1);
        assert_eq!(snap.chunks_written, 3);
        assert_eq!(snap.bytes_written, 62_500);
    }

    #[tokio::test]
    async fn chunk_from_unregistered_identity_is_rejected() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let reply = broker
            .handle_message(&Identity::generate(), &bare(b"stray"))
            .await;
        assert_eq!(reply, UploadReply::Nak);
        assert!(pool_objects(&backend).await.is_empty());
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn repeated_header_does_not_open_a_second_blob() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        start(&broker, &identity, 100).await;
        broker.handle_message(&identity, &bare(b"first")).await;

        let reply = broker
            .handle_message(&identity, &header("again.bin", 100))
            .await;
        assert_eq!(reply, UploadReply::Nak);
        assert_eq!(pool_objects(&backend).await.len(), 1);
        assert_eq!(broker.metrics().snapshot().sessions_opened, 1);

        broker.disconnect(&identity).await;
    }

    #[tokio::test]
    async fn message_while_header_is_pending_is_rejected() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        broker.registry().reserve(&identity).unwrap();

        let reply = broker.handle_message(&identity, &header("f", 10)).await;
        assert_eq!(reply, UploadReply::Nak);
        assert!(pool_objects(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_rejected_and_session_survives() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        start(&broker, &identity, 6).await;

        assert_eq!(
            broker.handle_message(&identity, &at(0, b"ab")).await,
            UploadReply::Progress(2)
        );
        assert_eq!(
            broker.handle_message(&identity, &at(4, b"ef")).await,
            UploadReply::Nak
        );
        assert_eq!(
            broker.handle_message(&identity, &at(2, b"cd")).await,
            UploadReply::Progress(4)
        );
        assert_eq!(
            broker.handle_message(&identity, &at(4, b"ef")).await,
            UploadReply::Progress(6)
        );
        assert_eq!(broker.metrics().snapshot().sessions_completed, 1);
    }

    #[tokio::test]
    async fn bad_header_is_rejected_without_registration() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        let reply = broker
            .handle_message(&identity, &[Bytes::from_static(b"name"), Bytes::from_static(b"x")])
            .await;
        assert_eq!(reply, UploadReply::Nak);
        assert!(broker.registry().is_empty());

        // The identity can still start a proper session afterwards.
        start(&broker, &identity, 1).await;
        broker.disconnect(&identity).await;
    }

    #[tokio::test]
    async fn storage_failure_naks_and_tears_down() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        start(&broker, &identity, 10).await;
        broker.handle_message(&identity, &bare(b"12345")).await;

        backend.fail_writes(true);
        assert_eq!(
            broker.handle_message(&identity, &bare(b"67890")).await,
            UploadReply::Nak
        );
        backend.fail_writes(false);

        assert!(broker.registry().is_empty());
        assert_eq!(backend.open_contexts(), 0);
        assert!(pool_objects(&backend).await.is_empty(), "partial blob removed");
        assert_eq!(broker.metrics().snapshot().sessions_aborted, 1);

        // Later chunks from the same identity are treated as a new header.
        assert_eq!(
            broker.handle_message(&identity, &bare(b"67890")).await,
            UploadReply::Nak
        );
    }

    #[tokio::test]
    async fn header_failure_releases_the_reservation() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();

        backend.fail_writes(true);
        assert_eq!(
            broker.handle_message(&identity, &header("f.bin", 4)).await,
            UploadReply::Nak
        );
        backend.fail_writes(false);
        assert!(broker.registry().is_empty());
        assert_eq!(backend.open_contexts(), 0);

        start(&broker, &identity, 4).await;
        assert_eq!(
            broker.handle_message(&identity, &bare(b"data")).await,
            UploadReply::Progress(4)
        );
    }

    #[tokio::test]
    async fn disconnect_aborts_the_session() {
        let backend = MemoryBackend::new();
        let broker = broker(&backend);
        let identity = Identity::generate();
        start(&broker, &identity, 10).await;
        broker.handle_message(&identity, &bare(b"half")).await;

        broker.disconnect(&identity).await;
        assert!(broker.registry().is_empty());
        assert_eq!(backend.open_contexts(), 0);
        assert!(pool_objects(&backend).await.is_empty());
    }

    // -- Serving ---------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pipelined_chunks_keep_connection_order_across_workers() {
        use blobgate_core::FrameCodec;
        use blobgate_core::wire::DEFAULT_MAX_FRAME_SIZE;
        use futures::{SinkExt, StreamExt};
        use tokio::net::TcpStream;
        use tokio_util::codec::Framed;

        let backend = MemoryBackend::new();
        let store = ObjectStore::new(Arc::new(backend.clone()), StoreConfig::default());
        let broker = Arc::new(UploadBroker::new(
            store.clone(),
            UploadConfig {
                workers: 5,
                ..UploadConfig::default()
            },
        ));
        let router = Router::bind("127.0.0.1:0", DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        let addr = router.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(Arc::clone(&broker).serve(router, async move {
            let _ = stop_rx.await;
        }));

        // Several connections at once, each sending offset-less chunks
        // without waiting for progress replies.
        let mut uploads = JoinSet::new();
        for conn in 0..4u8 {
            uploads.spawn(async move {
                let chunks: Vec<Vec<u8>> = (0..12u8)
                    .map(|i| vec![conn * 16 + i; 97 + usize::from(i)])
                    .collect();
                let expected: Vec<u8> = chunks.concat();
                let stream = TcpStream::connect(addr).await.unwrap();
                let mut client = Framed::new(stream, FrameCodec::default());
                client.send(header("ordered.bin", expected.len() as u64)).await.unwrap();
                for chunk in &chunks {
                    client.send(bare(chunk)).await.unwrap();
                }

                let first = client.next().await.unwrap().unwrap();
                let UploadReply::Ack(id) = UploadReply::decode(&first).unwrap() else {
                    panic!("expected ACK");
                };
                let mut last = 0;
                for _ in &chunks {
                    let frames = client.next().await.unwrap().unwrap();
                    match UploadReply::decode(&frames).unwrap() {
                        UploadReply::Progress(n) => {
                            assert!(n > last, "progress only moves forward");
                            last = n;
                        }
                        other => panic!("expected progress, got {other:?}"),
                    }
                }
                assert_eq!(last, expected.len() as u64);
                (id, expected)
            });
        }

        while let Some(joined) = uploads.join_next().await {
            let (id, expected) = joined.unwrap();
            let pool = store.pool_for(&id);
            let handle = store.open_existing(&pool, &id).await.unwrap();
            assert_eq!(&handle.read_range(0, expected.len() + 1).await.unwrap()[..], &expected[..]);
            handle.destroy();
        }

        stop_tx.send(()).unwrap();
        serving.await.unwrap();
        assert!(broker.registry().is_empty());
        assert_eq!(broker.metrics().snapshot().sessions_completed, 4);
    }

    #[test]
    fn identity_always_maps_to_the_same_worker() {
        let identity = Identity::generate();
        let worker = worker_for(&identity, 5);
        assert!(worker < 5);
        for _ in 0..10 {
            assert_eq!(worker_for(&identity, 5), worker);
        }
        assert_eq!(worker_for(&identity, 1), 0);
    }

    // -- Idle reaping ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_reaped_and_lock_released() {
        let backend = MemoryBackend::new();
        let store = ObjectStore::new(Arc::new(backend.clone()), StoreConfig::default());
        let broker = UploadBroker::new(
            store,
            UploadConfig {
                idle_timeout: Duration::from_secs(60),
                ..UploadConfig::default()
            },
        );
        let active = Identity::generate();
        let abandoned = Identity::generate();
        start(&broker, &active, 100).await;
        start(&broker, &abandoned, 100).await;
        broker.handle_message(&abandoned, &bare(b"partial")).await;

        tokio::time::advance(Duration::from_secs(45)).await;
        broker.handle_message(&active, &bare(b"still here")).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(broker.reap_idle().await, 1);
        assert!(matches!(broker.registry().lookup(&abandoned), Lookup::Missing));
        assert!(matches!(broker.registry().lookup(&active), Lookup::Active(_)));
        assert_eq!(broker.metrics().snapshot().sessions_reaped, 1);
        assert_eq!(pool_objects(&backend).await.len(), 1, "only the live upload remains");

        broker.disconnect(&active).await;
        assert_eq!(backend.open_contexts(), 0);
    }
}
