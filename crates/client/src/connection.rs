use blobgate_core::{FrameCodec, Frames};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::error::ClientError;

/// A framed connection to one broker channel.
pub(crate) struct Connection {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub(crate) async fn open(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::default()),
        })
    }

    pub(crate) async fn send(&mut self, frames: Frames) -> Result<(), ClientError> {
        self.framed.send(frames).await?;
        Ok(())
    }

    pub(crate) async fn recv(&mut self) -> Result<Frames, ClientError> {
        match self.framed.next().await {
            Some(frames) => Ok(frames?),
            None => Err(ClientError::ConnectionClosed),
        }
    }
}
