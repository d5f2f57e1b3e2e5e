//! Long-running server roles.
//!
//! Every role stops when the shared shutdown flag flips to `true` or its
//! sender is dropped. Listeners are bound by the caller so that a bind
//! failure aborts startup before anything is served.

use std::sync::Arc;

use blobgate_broker::{BrokerMetrics, DownloadConfig, DownloadServer, Router, UploadBroker, UploadConfig};
use blobgate_collector::{CollectorConfig, GarbageCollector, SweepReport};
use blobgate_store::ObjectStore;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::api::{self, AppState};
use crate::error::ServerError;

/// Which roles a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Brokers, collector and HTTP surface.
    All,
    /// Upload broker and download server.
    Brokers,
    Collector,
    Http,
}

impl Role {
    pub fn runs_brokers(self) -> bool {
        matches!(self, Self::All | Self::Brokers)
    }

    pub fn runs_collector(self) -> bool {
        matches!(self, Self::All | Self::Collector)
    }

    pub fn runs_http(self) -> bool {
        matches!(self, Self::All | Self::Http)
    }
}

/// Most recent collector sweep, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct CollectorStatus {
    last: Mutex<Option<SweepReport>>,
}

impl CollectorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: SweepReport) {
        *self.last.lock() = Some(report);
    }

    pub fn last(&self) -> Option<SweepReport> {
        self.last.lock().clone()
    }
}

/// Resolves once shutdown is requested.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub async fn serve_upload(
    router: Router,
    store: ObjectStore,
    metrics: Arc<BrokerMetrics>,
    config: UploadConfig,
    shutdown: watch::Receiver<bool>,
) {
    let broker = Arc::new(UploadBroker::new(store, config).with_metrics(metrics));
    broker.serve(router, wait_for_shutdown(shutdown)).await;
}

pub async fn serve_download(
    router: Router,
    store: ObjectStore,
    metrics: Arc<BrokerMetrics>,
    config: DownloadConfig,
    shutdown: watch::Receiver<bool>,
) {
    let server = DownloadServer::new(store, config).with_metrics(metrics);
    server.serve(router, wait_for_shutdown(shutdown)).await;
}

/// Run the garbage collector, publishing each sweep to `status`.
pub async fn run_collector(
    store: ObjectStore,
    config: CollectorConfig,
    status: Arc<CollectorStatus>,
    shutdown: watch::Receiver<bool>,
) {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let (report_tx, mut report_rx) = mpsc::channel(4);

    let forward = tokio::spawn(async move {
        wait_for_shutdown(shutdown).await;
        let _ = stop_tx.send(()).await;
    });
    let reports = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            status.record(report);
        }
    });

    let mut collector = GarbageCollector::new(store, config, stop_rx).with_report_channel(report_tx);
    collector.run().await;

    forward.abort();
    drop(collector);
    let _ = reports.await;
}

pub async fn serve_http(
    listener: TcpListener,
    state: AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    info!(address = %listener.local_addr()?, "http surface listening");
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    info!("http surface stopped");
    Ok(())
}
