use bytes::Bytes;

use super::{ProtocolError, decode_u64, decode_utf8, encode_u64};
use crate::types::ObjectId;
use crate::wire::Frames;

/// A request for one chunk: `[object id][offset][chunk size]`, the latter
/// two as decimal ASCII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub object_id: ObjectId,
    pub offset: u64,
    pub chunk_size: usize,
}

impl DownloadRequest {
    pub fn decode(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        let [id, offset, size] = frames else {
            return Err(ProtocolError::FrameCount {
                message: "download request",
                expected: "3",
                actual: frames.len(),
            });
        };
        let object_id = decode_utf8("object id", id)?
            .parse()
            .map_err(|e: uuid::Error| ProtocolError::field("object id", e.to_string()))?;
        let offset = decode_utf8("offset", offset)?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ProtocolError::field("offset", e.to_string()))?;
        let chunk_size: usize = decode_utf8("chunk size", size)?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                ProtocolError::field("chunk size", e.to_string())
            })?;
        if chunk_size == 0 {
            return Err(ProtocolError::field("chunk size", "must be positive"));
        }
        Ok(Self {
            object_id,
            offset,
            chunk_size,
        })
    }

    #[must_use]
    pub fn encode(&self) -> Frames {
        vec![
            Bytes::from(self.object_id.to_string()),
            Bytes::from(self.offset.to_string()),
            Bytes::from(self.chunk_size.to_string()),
        ]
    }
}

/// Outcome tag of a download reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// A full chunk was read; more data may follow.
    Ok,
    /// Fewer bytes than requested were available; end of object.
    Eof,
    /// The request failed; the payload carries a UTF-8 reason.
    Error,
}

impl DownloadStatus {
    #[must_use]
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Ok => b"OK",
            Self::Eof => b"EOF",
            Self::Error => b"ERR",
        }
    }

    fn parse(tag: &[u8]) -> Option<Self> {
        match tag {
            b"OK" => Some(Self::Ok),
            b"EOF" => Some(Self::Eof),
            b"ERR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Reply to a [`DownloadRequest`]: `[status][offset LE8][payload]`.
///
/// The offset echoes the request so clients can reassemble out-of-order
/// replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReply {
    pub status: DownloadStatus,
    pub offset: u64,
    pub payload: Bytes,
}

impl DownloadReply {
    /// Build a data reply, tagging it `EOF` when the read came up short.
    #[must_use]
    pub fn data(offset: u64, payload: Bytes, requested: usize) -> Self {
        let status = if payload.len() < requested {
            DownloadStatus::Eof
        } else {
            DownloadStatus::Ok
        };
        Self {
            status,
            offset,
            payload,
        }
    }

    #[must_use]
    pub fn error(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            status: DownloadStatus::Error,
            offset,
            payload: Bytes::from(reason.into()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == DownloadStatus::Error
    }

    #[must_use]
    pub fn encode(&self) -> Frames {
        vec![
            Bytes::from_static(self.status.as_bytes()),
            encode_u64(self.offset),
            self.payload.clone(),
        ]
    }

    pub fn decode(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        let [tag, offset, payload] = frames else {
            return Err(ProtocolError::UnknownReply);
        };
        let status = DownloadStatus::parse(tag).ok_or(ProtocolError::UnknownReply)?;
        Ok(Self {
            status,
            offset: decode_u64("offset", offset)?,
            payload: payload.clone(),
        })
    }
}
