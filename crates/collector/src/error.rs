use blobgate_core::ErrorKind;
use blobgate_store::StoreError;
use thiserror::Error;

/// Errors met while sweeping. None of them stop the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to list pools: {0}")]
    ListPools(#[source] StoreError),

    #[error("failed to scan pool {pool}: {source}")]
    Pool {
        pool: String,
        #[source]
        source: StoreError,
    },
}

impl CollectorError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ListPools(e) | Self::Pool { source: e, .. } => e.kind(),
        }
    }
}
