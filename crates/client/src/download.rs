//! Credit-windowed download client.

use std::io::{Cursor, SeekFrom};

use blobgate_core::{DownloadReply, DownloadRequest, DownloadStatus, ObjectId};
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::ToSocketAddrs;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::credit::CreditWindow;
use crate::error::ClientError;
use crate::upload::DEFAULT_CHUNK_SIZE;

/// Requests kept in flight unless overridden.
pub const DEFAULT_CREDIT: usize = 10;

/// Client for the download channel.
pub struct DownloadClient {
    conn: Connection,
    credit: usize,
    chunk_size: usize,
}

impl DownloadClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Ok(Self {
            conn: Connection::open(addr).await?,
            credit: DEFAULT_CREDIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    #[must_use]
    pub fn with_credit(mut self, credit: usize) -> Self {
        self.credit = credit.max(1);
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Download a whole object into memory.
    pub async fn download_to_vec(&mut self, object_id: &ObjectId) -> Result<Vec<u8>, ClientError> {
        let mut out = Cursor::new(Vec::new());
        let len = self.download(object_id, &mut out).await?;
        let mut bytes = out.into_inner();
        bytes.truncate(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(bytes)
    }

    /// Download a whole object into `out`, returning its length.
    ///
    /// Requests for consecutive chunks are issued while credit remains.
    /// Every reply returns one credit and is written at the offset it
    /// echoes, so arrival order does not matter. Once an `EOF` reply is
    /// seen no new requests are issued; replies already in flight are
    /// still drained before returning. An `ERR` reply fails the download
    /// after the drain.
    pub async fn download<W>(&mut self, object_id: &ObjectId, out: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + AsyncSeek + Unpin,
    {
        let mut window = CreditWindow::new(self.credit);
        let mut next_offset = 0u64;
        let mut end: Option<u64> = None;
        let mut failure: Option<ClientError> = None;

        loop {
            while end.is_none() && failure.is_none() && window.try_acquire() {
                let request = DownloadRequest {
                    object_id: *object_id,
                    offset: next_offset,
                    chunk_size: self.chunk_size,
                };
                self.conn.send(request.encode()).await?;
                next_offset += self.chunk_size as u64;
            }
            if window.outstanding() == 0 {
                break;
            }

            let frames = self.conn.recv().await?;
            window.release();
            let reply = DownloadReply::decode(&frames)?;
            match reply.status {
                DownloadStatus::Ok => place(out, &reply).await?,
                DownloadStatus::Eof => {
                    place(out, &reply).await?;
                    let reply_end = reply.offset + reply.payload.len() as u64;
                    end = Some(end.map_or(reply_end, |e| e.min(reply_end)));
                }
                DownloadStatus::Error => {
                    let message = String::from_utf8_lossy(&reply.payload).into_owned();
                    warn!(%object_id, offset = reply.offset, %message, "download chunk failed");
                    failure.get_or_insert(ClientError::Server {
                        offset: reply.offset,
                        message,
                    });
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        out.flush().await?;
        let len = end.unwrap_or(0);
        debug!(%object_id, len, "download complete");
        Ok(len)
    }
}

async fn place<W>(out: &mut W, reply: &DownloadReply) -> Result<(), ClientError>
where
    W: AsyncWrite + AsyncSeek + Unpin,
{
    if reply.payload.is_empty() {
        return Ok(());
    }
    out.seek(SeekFrom::Start(reply.offset)).await?;
    out.write_all(&reply.payload).await?;
    Ok(())
}
