use std::io;

use axum::Json;
use axum::extract::{Multipart, State};
use blobgate_core::BlobDescriptor;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::info;

use super::AppState;
use crate::error::ServerError;

/// `POST /upload` -- store the multipart file field as a new blob.
///
/// Responds with the blob descriptor. Fields other than the configured
/// content field are ignored.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BlobDescriptor>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(state.http.content_field.as_str()) {
            continue;
        }
        let filename = field
            .file_name()
            .map_or_else(|| state.http.content_field.clone(), str::to_owned);
        let reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        let descriptor = state.store.write_all(&filename, reader).await?;
        info!(
            pool = %descriptor.pool,
            object_id = %descriptor.object_id,
            size = descriptor.size,
            "blob uploaded over http"
        );
        return Ok(Json(descriptor));
    }

    Err(ServerError::BadRequest(format!(
        "'{}' not found in uploaded data",
        state.http.content_field
    )))
}
