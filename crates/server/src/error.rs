use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use blobgate_broker::BrokerError;
use blobgate_core::ErrorKind;
use blobgate_store::{BackendError, StoreError};
use thiserror::Error;

/// Errors that can occur when running the blobgate server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the HTTP listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend construction failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// An object store error surfaced through the API.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A broker role failed to start.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The `Range` header does not fit the object.
    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },
}

impl ServerError {
    fn status(&self) -> StatusCode {
        let kind = match self {
            Self::BadRequest(_) => return StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable { .. } => return StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Config(_) | Self::Io(_) | Self::Backend(_) => {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            Self::Store(e) => e.kind(),
            Self::Broker(e) => e.kind(),
        };
        match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Protocol => StatusCode::BAD_REQUEST,
            ErrorKind::LockConflict => StatusCode::CONFLICT,
            ErrorKind::Storage | ErrorKind::Transport => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        let mut response = (status, axum::Json(body)).into_response();

        if let Self::RangeNotSatisfiable { size } = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }

        response
    }
}
