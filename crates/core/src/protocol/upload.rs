use bytes::Bytes;

use super::{ProtocolError, decode_u64, decode_utf8, encode_u64};
use crate::types::ObjectId;
use crate::wire::Frames;

/// Reply tag acknowledging an upload header.
pub const ACK: &[u8] = b"ACK";
/// Reply tag rejecting a message.
pub const NAK: &[u8] = b"NAK";

/// First message of an upload session: `[filename][total size LE8]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHeader {
    pub filename: String,
    pub total_size: u64,
}

impl UploadHeader {
    pub fn decode(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        let [filename, size] = frames else {
            return Err(ProtocolError::FrameCount {
                message: "upload header",
                expected: "2",
                actual: frames.len(),
            });
        };
        let filename = decode_utf8("filename", filename)?.to_owned();
        let total_size = decode_u64("total size", size)?;
        if total_size == 0 {
            return Err(ProtocolError::field("total size", "must be positive"));
        }
        Ok(Self {
            filename,
            total_size,
        })
    }

    #[must_use]
    pub fn encode(&self) -> Frames {
        vec![
            Bytes::copy_from_slice(self.filename.as_bytes()),
            encode_u64(self.total_size),
        ]
    }
}

/// A data message of an active session.
///
/// Either `[payload]`, appended at the session cursor, or
/// `[offset LE8][payload]`, which must match the cursor exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub offset: Option<u64>,
    pub payload: Bytes,
}

impl UploadChunk {
    pub fn decode(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        match frames {
            [payload] => Ok(Self {
                offset: None,
                payload: payload.clone(),
            }),
            [offset, payload] => Ok(Self {
                offset: Some(decode_u64("chunk offset", offset)?),
                payload: payload.clone(),
            }),
            _ => Err(ProtocolError::FrameCount {
                message: "upload chunk",
                expected: "1 or 2",
                actual: frames.len(),
            }),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Frames {
        match self.offset {
            Some(offset) => vec![encode_u64(offset), self.payload.clone()],
            None => vec![self.payload.clone()],
        }
    }
}

/// Broker reply on the upload channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReply {
    /// Header accepted; carries the id of the blob being written.
    Ack(ObjectId),
    /// Cumulative bytes written so far.
    Progress(u64),
    Nak,
}

impl UploadReply {
    #[must_use]
    pub fn encode(&self) -> Frames {
        match self {
            Self::Ack(id) => vec![Bytes::from_static(ACK), Bytes::from(id.to_string())],
            Self::Progress(written) => vec![encode_u64(*written)],
            Self::Nak => vec![Bytes::from_static(NAK)],
        }
    }

    pub fn decode(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        match frames {
            [tag, id] if &tag[..] == ACK => {
                let id = decode_utf8("object id", id)?
                    .parse()
                    .map_err(|e: uuid::Error| ProtocolError::field("object id", e.to_string()))?;
                Ok(Self::Ack(id))
            }
            [tag] if &tag[..] == NAK => Ok(Self::Nak),
            [written] if written.len() == 8 => Ok(Self::Progress(decode_u64("progress", written)?)),
            _ => Err(ProtocolError::UnknownReply),
        }
    }
}
