//! Stop-and-wait upload client.

use blobgate_core::{Frames, ObjectId, ProtocolError, UploadChunk, UploadHeader, UploadReply};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::ToSocketAddrs;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::ClientError;

/// Chunk size used by both clients unless overridden.
pub const DEFAULT_CHUNK_SIZE: usize = 25_000;

/// Result of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    pub object_id: ObjectId,
    pub size: u64,
}

/// Client for the upload channel.
///
/// One connection is one session identity. Uploads on the same client run
/// one after another; the broker forgets the session once the last chunk
/// lands, so the next header starts a fresh blob.
pub struct UploadClient {
    conn: Connection,
    chunk_size: usize,
}

impl UploadClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Ok(Self {
            conn: Connection::open(addr).await?,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Override the chunk size. Zero is raised to one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Upload an in-memory buffer.
    pub async fn upload_bytes(
        &mut self,
        filename: &str,
        data: &[u8],
    ) -> Result<UploadReceipt, ClientError> {
        self.upload(filename, data.len() as u64, data).await
    }

    /// Upload exactly `size` bytes read from `reader`.
    ///
    /// Each chunk is sent with its explicit offset and the next one waits
    /// for the broker's cumulative count. A `NAK` at any point fails the
    /// upload; the broker discards what it had written.
    pub async fn upload<R>(
        &mut self,
        filename: &str,
        size: u64,
        mut reader: R,
    ) -> Result<UploadReceipt, ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let header = UploadHeader {
            filename: filename.to_owned(),
            total_size: size,
        };
        let object_id = match self.exchange(header.encode()).await? {
            UploadReply::Ack(id) => id,
            UploadReply::Nak => return Err(ClientError::Rejected("upload header")),
            UploadReply::Progress(_) => return Err(ProtocolError::UnknownReply.into()),
        };
        debug!(%object_id, filename, size, "upload accepted");

        let mut offset = 0u64;
        while offset < size {
            let want = usize::try_from(size - offset)
                .unwrap_or(usize::MAX)
                .min(self.chunk_size);
            let payload = read_chunk(&mut reader, want).await?;
            if payload.is_empty() {
                return Err(ClientError::ShortInput {
                    expected: size,
                    got: offset,
                });
            }
            let expected = offset + payload.len() as u64;
            let chunk = UploadChunk {
                offset: Some(offset),
                payload: payload.freeze(),
            };
            match self.exchange(chunk.encode()).await? {
                UploadReply::Progress(written) if written == expected => offset = written,
                UploadReply::Progress(got) => {
                    return Err(ClientError::ProgressMismatch { expected, got });
                }
                UploadReply::Nak => return Err(ClientError::Rejected("upload chunk")),
                UploadReply::Ack(_) => return Err(ProtocolError::UnknownReply.into()),
            }
        }

        info!(%object_id, size, "upload complete");
        Ok(UploadReceipt { object_id, size })
    }

    async fn exchange(&mut self, frames: Frames) -> Result<UploadReply, ClientError> {
        self.conn.send(frames).await?;
        let reply = self.conn.recv().await?;
        Ok(UploadReply::decode(&reply)?)
    }
}

/// Read up to `want` bytes, stopping early only at end of input.
async fn read_chunk<R>(reader: &mut R, want: usize) -> Result<BytesMut, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(want);
    while buf.len() < want {
        let mut limited = (&mut *reader).take((want - buf.len()) as u64);
        if limited.read_buf(&mut buf).await? == 0 {
            break;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_chunk_fills_across_short_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"abcdefghij").await.unwrap();
        });
        let chunk = read_chunk(&mut rx, 8).await.unwrap();
        assert_eq!(&chunk[..], b"abcdefgh");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn read_chunk_stops_at_end_of_input() {
        let mut input: &[u8] = b"abc";
        let chunk = read_chunk(&mut input, 8).await.unwrap();
        assert_eq!(&chunk[..], b"abc");
        let rest = read_chunk(&mut input, 8).await.unwrap();
        assert!(rest.is_empty());
    }
}
