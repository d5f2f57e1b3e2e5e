//! Message layouts for the upload and download channels.
//!
//! All integers that travel as raw frames are 8-byte little-endian. The
//! download request carries its offset and chunk size as decimal ASCII.

pub mod download;
pub mod upload;

use bytes::Bytes;
use thiserror::Error;

use crate::error::ErrorKind;

/// A message that does not match the expected layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{message} expects {expected} frame(s), got {actual}")]
    FrameCount {
        message: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unrecognized reply")]
    UnknownReply,
}

impl ProtocolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }

    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Encode a `u64` as an 8-byte little-endian frame.
#[must_use]
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

/// Decode an 8-byte little-endian frame.
pub fn decode_u64(field: &'static str, frame: &[u8]) -> Result<u64, ProtocolError> {
    let raw: [u8; 8] = frame
        .try_into()
        .map_err(|_| ProtocolError::field(field, format!("expected 8 bytes, got {}", frame.len())))?;
    Ok(u64::from_le_bytes(raw))
}

pub(crate) fn decode_utf8<'a>(field: &'static str, frame: &'a [u8]) -> Result<&'a str, ProtocolError> {
    std::str::from_utf8(frame).map_err(|e| ProtocolError::field(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_is_little_endian() {
        let frame = encode_u64(0x0102);
        assert_eq!(&frame[..], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_u64("size", &frame).unwrap(), 0x0102);
    }

    #[test]
    fn short_integer_frame_is_rejected() {
        let err = decode_u64("size", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "size", .. }));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
