use blobgate_core::{ErrorKind, Identity, ProtocolError};
use blobgate_store::StoreError;
use thiserror::Error;

/// Errors raised while serving the upload and download channels.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("peer {0} is not connected")]
    PeerGone(Identity),

    #[error("peer {0} is not reading its replies")]
    PeerBacklogged(Identity),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("identity {0} already has an upload session")]
    DuplicateSession(Identity),

    #[error("upload session for {0} is not ready yet")]
    SessionPending(Identity),

    #[error("upload session is closed")]
    SessionClosed,

    #[error("chunk offset {got} does not match write cursor {expected}")]
    OffsetMismatch { expected: u64, got: u64 },

    #[error("chunk of {len} bytes at {written} exceeds declared size {expected}")]
    Overflow { written: u64, len: u64, expected: u64 },

    #[error("empty chunk")]
    EmptyChunk,

    #[error("requested chunk of {requested} bytes exceeds limit of {limit}")]
    ChunkTooLarge { requested: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bind { .. }
            | Self::Transport(_)
            | Self::PeerGone(_)
            | Self::PeerBacklogged(_) => ErrorKind::Transport,
            Self::Protocol(_)
            | Self::DuplicateSession(_)
            | Self::SessionPending(_)
            | Self::SessionClosed
            | Self::OffsetMismatch { .. }
            | Self::Overflow { .. }
            | Self::EmptyChunk
            | Self::ChunkTooLarge { .. } => ErrorKind::Protocol,
            Self::Store(e) => e.kind(),
        }
    }

    /// Whether the error ends the upload session it occurred in.
    ///
    /// Protocol violations leave the session intact so the client can
    /// resend; storage failures and a lost lock tear it down.
    #[must_use]
    pub fn ends_session(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Storage | ErrorKind::LockConflict | ErrorKind::NotFound
        )
    }
}
