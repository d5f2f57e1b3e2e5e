//! Multipart message framing for the upload and download channels.
//!
//! A message is an ordered list of byte frames. On the wire it is encoded
//! as a big-endian `u16` frame count followed by each frame as a big-endian
//! `u32` length prefix and its bytes. Messages are delivered whole: the
//! decoder yields nothing until every frame of a message has arrived.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// One multipart message.
pub type Frames = Vec<Bytes>;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on frames per message. Protocol messages carry at most four.
pub const MAX_FRAMES_PER_MESSAGE: usize = 16;

const COUNT_LEN: usize = 2;
const LENGTH_LEN: usize = 4;

/// [`Decoder`]/[`Encoder`] for multipart messages.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl Decoder for FrameCodec {
    type Item = Frames;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frames>, io::Error> {
        if src.len() < COUNT_LEN {
            return Ok(None);
        }
        let count = usize::from(u16::from_be_bytes([src[0], src[1]]));
        if count == 0 || count > MAX_FRAMES_PER_MESSAGE {
            return Err(invalid(format!("invalid frame count {count}")));
        }

        // Walk the length prefixes without consuming so a partial message
        // stays buffered untouched.
        let mut pos = COUNT_LEN;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            if src.len() < pos + LENGTH_LEN {
                src.reserve(pos + LENGTH_LEN - src.len());
                return Ok(None);
            }
            let mut prefix = [0u8; LENGTH_LEN];
            prefix.copy_from_slice(&src[pos..pos + LENGTH_LEN]);
            let len = u32::from_be_bytes(prefix) as usize;
            if len > self.max_frame_size {
                return Err(invalid(format!(
                    "frame of {len} bytes exceeds limit of {}",
                    self.max_frame_size
                )));
            }
            pos += LENGTH_LEN;
            if src.len() < pos + len {
                src.reserve(pos + len - src.len());
                return Ok(None);
            }
            lengths.push(len);
            pos += len;
        }

        src.advance(COUNT_LEN);
        let mut frames = Vec::with_capacity(count);
        for len in lengths {
            src.advance(LENGTH_LEN);
            frames.push(src.split_to(len).freeze());
        }
        Ok(Some(frames))
    }
}

impl Encoder<Frames> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frames: Frames, dst: &mut BytesMut) -> Result<(), io::Error> {
        if frames.is_empty() || frames.len() > MAX_FRAMES_PER_MESSAGE {
            return Err(invalid(format!("invalid frame count {}", frames.len())));
        }
        let mut total = COUNT_LEN;
        for frame in &frames {
            if frame.len() > self.max_frame_size {
                return Err(invalid(format!(
                    "frame of {} bytes exceeds limit of {}",
                    frame.len(),
                    self.max_frame_size
                )));
            }
            total += LENGTH_LEN + frame.len();
        }

        dst.reserve(total);
        // Both casts are bounded by the checks above.
        #[allow(clippy::cast_possible_truncation)]
        {
            dst.put_u16(frames.len() as u16);
            for frame in frames {
                dst.put_u32(frame.len() as u32);
                dst.extend_from_slice(&frame);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frames: &[&[u8]]) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let frames = frames.iter().map(|f| Bytes::copy_from_slice(f)).collect();
        codec.encode(frames, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decodes_complete_message() {
        let mut buf = encode(&[b"hello", b"", b"world"]);
        let frames = FrameCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"hello");
        assert!(frames[1].is_empty());
        assert_eq!(&frames[2][..], b"world");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_message_is_not_delivered() {
        let full = encode(&[b"abc", b"defgh"]);
        let mut codec = FrameCodec::default();
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut partial).unwrap().is_none(), "cut={cut}");
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn back_to_back_messages_decode_in_order() {
        let mut buf = encode(&[b"one"]);
        buf.extend_from_slice(&encode(&[b"two", b"2"]));
        let mut codec = FrameCodec::default();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first[0][..], b"one");
        assert_eq!(second.len(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = encode(&[&[0u8; 64]]);
        let err = FrameCodec::new(16).decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut out = BytesMut::new();
        let err = FrameCodec::new(16)
            .encode(vec![Bytes::from(vec![0u8; 64])], &mut out)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn zero_frame_count_is_rejected() {
        let mut buf = BytesMut::from(&[0u8, 0u8][..]);
        assert!(FrameCodec::default().decode(&mut buf).is_err());

        let mut out = BytesMut::new();
        assert!(FrameCodec::default().encode(Vec::new(), &mut out).is_err());
    }
}
