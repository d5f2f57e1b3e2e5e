use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use blobgate_store::{BlobHandle, StoreError};
use bytes::Bytes;
use futures::stream;

use super::{AppState, parse_object_path};
use crate::error::ServerError;

/// Parse a single `bytes=` range against an object of `size` bytes.
///
/// Returns the half-open `[start, end)` interval. Supports `start-end`,
/// `start-` and `-suffix`; an end past the object is clamped to its last
/// byte and a suffix longer than the object selects all of it. `None`
/// means the header is malformed or selects nothing.
fn parse_range_header(range_header: &str, size: u64) -> Option<(u64, u64)> {
    let range = range_header.trim().strip_prefix("bytes=")?.trim();
    if range.contains(',') {
        return None;
    }
    let (start, end) = range.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // bytes=-500 means the last 500 bytes
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 || size == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix), size));
    }

    let start: u64 = start.parse().ok()?;
    if start >= size {
        return None;
    }
    let end = if end.is_empty() {
        size
    } else {
        let last: u64 = end.parse().ok()?;
        if last < start {
            return None;
        }
        last.min(size - 1) + 1
    };
    Some((start, end))
}

/// `GET /download/{pool}/{object_id}` -- stream a blob, honouring `Range`.
pub async fn download(
    State(state): State<AppState>,
    Path((pool, object_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let (pool, id) = parse_object_path(&state.store, &pool, &object_id)?;
    let handle = state.store.open_existing(&pool, &id).await?;
    let size = handle.size();

    let range = match headers.get(header::RANGE) {
        None => None,
        Some(value) => {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|value| parse_range_header(value, size));
            match parsed {
                Some(range) => Some(range),
                None => {
                    handle.destroy();
                    return Err(ServerError::RangeNotSatisfiable { size });
                }
            }
        }
    };

    let (status, start, end) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
        None => (StatusCode::OK, 0, size),
    };

    let filename = if handle.filename().is_empty() {
        id.to_string()
    } else {
        handle.filename().replace('"', "")
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if status == StatusCode::PARTIAL_CONTENT {
        let content_range = format!("bytes {start}-{}/{size}", end - 1);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    let piece = state.store.config().io_buffer_size.max(1);
    let body = Body::from_stream(read_stream(handle, start, end, piece));
    Ok((status, response_headers, body).into_response())
}

/// Read `[start, end)` from the blob in pieces of at most `piece` bytes.
/// The handle is released when the stream ends or is dropped.
fn read_stream(
    handle: BlobHandle,
    start: u64,
    end: u64,
    piece: usize,
) -> impl futures::Stream<Item = Result<Bytes, StoreError>> + Send + 'static {
    stream::try_unfold((handle, start), move |(handle, pos)| async move {
        if pos >= end {
            handle.destroy();
            return Ok(None);
        }
        let want = usize::try_from(end - pos).unwrap_or(usize::MAX).min(piece);
        let bytes = handle.read_range(pos, want).await?;
        if bytes.is_empty() {
            handle.destroy();
            return Ok(None);
        }
        let next = pos + bytes.len() as u64;
        Ok(Some((bytes, (handle, next))))
    })
}
