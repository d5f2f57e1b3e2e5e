use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::info;

use super::{AppState, parse_object_path};
use crate::error::ServerError;

/// `DELETE /delete/{pool}/{object_id}` -- remove a blob unless it is locked.
pub async fn delete(
    State(state): State<AppState>,
    Path((pool, object_id)): Path<(String, String)>,
) -> Result<StatusCode, ServerError> {
    let (pool, id) = parse_object_path(&state.store, &pool, &object_id)?;
    let handle = state.store.open_existing(&pool, &id).await?;
    let deleted = handle.delete().await;
    handle.destroy();
    deleted?;
    info!(%pool, object_id = %id, "blob deleted over http");
    Ok(StatusCode::NO_CONTENT)
}
