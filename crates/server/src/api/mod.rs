pub mod delete;
pub mod download;
pub mod health;
pub mod upload;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use blobgate_broker::BrokerMetrics;
use blobgate_core::{ObjectId, PoolName};
use blobgate_store::ObjectStore;
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::error::ServerError;
use crate::roles::CollectorStatus;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Adapter over the configured backend.
    pub store: ObjectStore,
    /// Counters of the brokers running in this process.
    pub metrics: Arc<BrokerMetrics>,
    /// Last sweep of the collector running in this process, if any.
    pub collector: Arc<CollectorStatus>,
    pub http: Arc<HttpConfig>,
}

/// Build the Axum router with all routes and request tracing.
pub fn router(state: AppState) -> Router {
    let body_limit = state.http.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health))
        .route("/upload", post(upload::upload))
        .route("/download/{pool}/{object_id}", get(download::download))
        .route("/delete/{pool}/{object_id}", delete(delete::delete))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Validate the `{pool}/{object_id}` path segments.
///
/// Pools outside the configured prefix and malformed ids are rejected
/// before the backend is touched.
pub(crate) fn parse_object_path(
    store: &ObjectStore,
    pool: &str,
    object_id: &str,
) -> Result<(PoolName, ObjectId), ServerError> {
    let pool = PoolName::new(pool);
    if !store.owns_pool(&pool) {
        return Err(ServerError::BadRequest(format!("unknown pool: {pool}")));
    }
    let id = object_id
        .parse::<ObjectId>()
        .map_err(|e| ServerError::BadRequest(format!("invalid object id: {e}")))?;
    Ok((pool, id))
}
