use axum::Json;
use axum::extract::State;
use blobgate_broker::MetricsSnapshot;
use blobgate_collector::SweepReport;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub metrics: MetricsSnapshot,
    /// Absent until the collector in this process has finished a sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepReport>,
}

/// `GET /health` -- returns service status together with a metrics snapshot.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        metrics: state.metrics.snapshot(),
        last_sweep: state.collector.last(),
    })
}
