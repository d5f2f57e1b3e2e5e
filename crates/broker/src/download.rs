use std::future::Future;
use std::sync::Arc;

use blobgate_core::{DownloadReply, DownloadRequest};
use blobgate_store::ObjectStore;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DownloadConfig;
use crate::error::BrokerError;
use crate::metrics::BrokerMetrics;
use crate::transport::{Inbound, Router};

const INBOUND_QUEUE_DEPTH: usize = 1024;

/// Serves the chunk-request download protocol from a single loop.
///
/// Each request opens the blob, reads one range and releases the handle
/// before replying. Clients keep at most `credit_window` requests
/// outstanding; a peer that lets replies pile up past twice that is
/// disconnected by the router.
pub struct DownloadServer {
    store: ObjectStore,
    config: DownloadConfig,
    metrics: Arc<BrokerMetrics>,
}

impl DownloadServer {
    pub fn new(store: ObjectStore, config: DownloadConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(BrokerMetrics::default()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<BrokerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Answer one request. Never fails: problems become an `ERR` reply.
    #[instrument(skip_all)]
    pub async fn handle_request(&self, frames: &[Bytes]) -> DownloadReply {
        self.metrics.increment_download_requests();
        let request = match DownloadRequest::decode(frames) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "malformed download request");
                self.metrics.increment_download_errors();
                return DownloadReply::error(0, e.to_string());
            }
        };

        match self.read_chunk(&request).await {
            Ok(payload) => {
                self.metrics.add_bytes_served(payload.len() as u64);
                DownloadReply::data(request.offset, payload, request.chunk_size)
            }
            Err(e) => {
                warn!(object_id = %request.object_id, offset = request.offset, error = %e, "download request failed");
                self.metrics.increment_download_errors();
                DownloadReply::error(request.offset, e.to_string())
            }
        }
    }

    async fn read_chunk(&self, request: &DownloadRequest) -> Result<Bytes, BrokerError> {
        if request.chunk_size > self.config.max_chunk_size {
            return Err(BrokerError::ChunkTooLarge {
                requested: request.chunk_size,
                limit: self.config.max_chunk_size,
            });
        }
        let pool = self.store.pool_for(&request.object_id);
        let handle = self.store.open_existing(&pool, &request.object_id).await?;
        let read = handle.read_range(request.offset, request.chunk_size).await;
        handle.destroy();
        Ok(read?)
    }

    /// Serve requests from `router` until `shutdown` resolves.
    pub async fn serve<F>(&self, router: Router, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = router.with_reply_queue_depth(self.config.reply_queue_depth());
        let replies = router.replies();
        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let routing = tokio::spawn(router.run(inbound_tx, shutdown));
        info!(credit_window = self.config.credit_window, "download server running");

        while let Some(inbound) = inbound_rx.recv().await {
            let Inbound::Message(envelope) = inbound else {
                continue;
            };
            let reply = self.handle_request(&envelope.frames).await;
            if let Err(e) = replies.send(&envelope.identity, reply.encode()) {
                debug!(error = %e, "download reply dropped");
            }
        }

        if let Err(e) = routing.await {
            error!(error = %e, "download router failed");
        }
        info!("download server stopped");
    }
}

impl std::fmt::Debug for DownloadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
