//! Error types for the blobgate clients.

use blobgate_core::{ErrorKind, ProtocolError};
use thiserror::Error;

/// Errors that can occur during a transfer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure while connecting, sending or receiving.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The server closed the connection mid-transfer.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server sent something that is not a valid reply.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered `NAK`.
    #[error("server rejected the {0}")]
    Rejected(&'static str),

    /// The server answered a download request with `ERR`.
    #[error("server error at offset {offset}: {message}")]
    Server { offset: u64, message: String },

    /// The server acknowledged a different byte count than was sent.
    #[error("server reported {got} bytes written, expected {expected}")]
    ProgressMismatch { expected: u64, got: u64 },

    /// The input ended before the declared size was reached.
    #[error("input ended after {got} of {expected} bytes")]
    ShortInput { expected: u64, got: u64 },
}

impl ClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::ConnectionClosed => ErrorKind::Transport,
            Self::Protocol(_)
            | Self::Rejected(_)
            | Self::ProgressMismatch { .. }
            | Self::ShortInput { .. } => ErrorKind::Protocol,
            Self::Server { .. } => ErrorKind::Storage,
        }
    }

    /// Returns `true` if retrying the whole transfer may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed | Self::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert_eq!(ClientError::ConnectionClosed.kind(), ErrorKind::Transport);
    }

    #[test]
    fn server_errors_are_not_retryable() {
        let err = ClientError::Server {
            offset: 0,
            message: "not found".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not found"));
    }
}
