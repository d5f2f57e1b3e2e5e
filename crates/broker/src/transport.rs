//! Identity-addressed message transport.
//!
//! A [`Router`] accepts TCP connections, gives each one a fresh
//! [`Identity`] and funnels every inbound message into one queue tagged with
//! that identity. Replies are addressed back by identity through a
//! [`ReplySender`]; each connection drains its replies from its own writer
//! task, so a slow peer never blocks the caller.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use blobgate_core::{FrameCodec, Frames, Identity};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BrokerError;

/// One message received from one connection.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub identity: Identity,
    pub frames: Frames,
}

/// Events delivered to the router's consumer.
#[derive(Debug, Clone)]
pub enum Inbound {
    Message(Envelope),
    /// The connection closed or failed; no further messages will arrive
    /// from this identity.
    Disconnected(Identity),
}

impl Inbound {
    /// The connection this event came from.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        match self {
            Self::Message(envelope) => &envelope.identity,
            Self::Disconnected(identity) => identity,
        }
    }
}

/// Replies queued for one peer before it counts as backlogged.
pub const DEFAULT_REPLY_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
struct Peer {
    replies: mpsc::Sender<Frames>,
    evicted: CancellationToken,
}

/// Routes replies to connected peers by identity.
#[derive(Debug, Clone, Default)]
pub struct ReplySender {
    peers: Arc<DashMap<Identity, Peer>>,
}

impl ReplySender {
    /// Queue `frames` for delivery to `identity`.
    ///
    /// Never waits. A peer whose reply queue is full is not reading what it
    /// asked for; it is disconnected and the reply is dropped.
    pub fn send(&self, identity: &Identity, frames: Frames) -> Result<(), BrokerError> {
        let outcome = match self.peers.get(identity) {
            Some(peer) => peer.replies.try_send(frames),
            None => return Err(BrokerError::PeerGone(identity.clone())),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                if let Some((_, peer)) = self.peers.remove(identity) {
                    peer.evicted.cancel();
                }
                warn!(identity = %identity, "reply queue full, disconnecting peer");
                Err(BrokerError::PeerBacklogged(identity.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(BrokerError::PeerGone(identity.clone())),
        }
    }

    /// Number of connected peers.
    pub fn connected(&self) -> usize {
        self.peers.len()
    }
}

/// Accepting side of the transport.
pub struct Router {
    listener: TcpListener,
    codec: FrameCodec,
    replies: ReplySender,
    reply_queue_depth: usize,
}

impl Router {
    /// Bind a listener on `addr`. Failure here is fatal to the owning role.
    pub async fn bind(addr: &str, max_frame_size: usize) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self::from_listener(listener, max_frame_size))
    }

    #[must_use]
    pub fn from_listener(listener: TcpListener, max_frame_size: usize) -> Self {
        Self {
            listener,
            codec: FrameCodec::new(max_frame_size),
            replies: ReplySender::default(),
            reply_queue_depth: DEFAULT_REPLY_QUEUE_DEPTH,
        }
    }

    /// Cap the replies buffered for each peer (minimum 1).
    #[must_use]
    pub fn with_reply_queue_depth(mut self, depth: usize) -> Self {
        self.reply_queue_depth = depth.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle for addressing replies to this router's peers.
    #[must_use]
    pub fn replies(&self) -> ReplySender {
        self.replies.clone()
    }

    /// Accept connections until `shutdown` resolves, forwarding inbound
    /// traffic to `inbound`.
    ///
    /// On return every connection task has been stopped, so once the caller
    /// drops its own copies of `inbound` the receiving side sees the end of
    /// the stream.
    pub async fn run<F>(self, inbound: mpsc::Sender<Inbound>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self
            .listener
            .local_addr()
            .map_or_else(|_| "unknown".to_owned(), |a| a.to_string());
        info!(addr = %addr, "router listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(addr = %addr, "router shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let identity = Identity::generate();
                        debug!(identity = %identity, peer = %peer, "connection accepted");
                        connections.spawn(serve_connection(
                            stream,
                            identity,
                            self.codec.clone(),
                            inbound.clone(),
                            self.replies.clone(),
                            self.reply_queue_depth,
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                // Reap finished connection tasks as they complete.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        self.replies.peers.clear();
    }
}

async fn serve_connection(
    stream: TcpStream,
    identity: Identity,
    codec: FrameCodec,
    inbound: mpsc::Sender<Inbound>,
    replies: ReplySender,
    reply_queue_depth: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, codec.clone());
    let mut writer = FramedWrite::new(write_half, codec);

    let (reply_tx, mut reply_rx) = mpsc::channel::<Frames>(reply_queue_depth);
    let evicted = CancellationToken::new();
    replies.peers.insert(
        identity.clone(),
        Peer {
            replies: reply_tx,
            evicted: evicted.clone(),
        },
    );

    let writer_identity = identity.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frames) = reply_rx.recv().await {
            if let Err(e) = writer.send(frames).await {
                debug!(identity = %writer_identity, error = %e, "reply send failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            () = evicted.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(frames)) => {
                    let envelope = Envelope {
                        identity: identity.clone(),
                        frames,
                    };
                    tokio::select! {
                        () = evicted.cancelled() => break,
                        sent = inbound.send(Inbound::Message(envelope)) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(identity = %identity, error = %e, "connection read failed");
                    break;
                }
                None => break,
            },
        }
    }

    debug!(identity = %identity, "connection closed");
    replies.peers.remove(&identity);
    let _ = inbound.send(Inbound::Disconnected(identity)).await;
    if evicted.is_cancelled() {
        // The peer stopped reading; its writer may be stuck on a full socket.
        writer_task.abort();
    } else {
        // Dropping the registered sender lets the writer flush what is
        // queued and exit.
        let _ = writer_task.await;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::oneshot;

    use super::*;

    async fn connect(addr: SocketAddr) -> tokio_util::codec::Framed<TcpStream, FrameCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        tokio_util::codec::Framed::new(stream, FrameCodec::default())
    }

    #[tokio::test]
    async fn messages_are_tagged_and_replies_routed_back() {
        let router = Router::bind("127.0.0.1:0", 1024).await.unwrap();
        let addr = router.local_addr().unwrap();
        let replies = router.replies();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(router.run(tx, async move {
            let _ = stop_rx.await;
        }));

        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        a.send(vec![Bytes::from_static(b"from-a")]).await.unwrap();
        b.send(vec![Bytes::from_static(b"from-b")]).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let Some(Inbound::Message(env)) = rx.recv().await else {
                panic!("expected a message");
            };
            seen.push(env);
        }
        assert_ne!(seen[0].identity, seen[1].identity);

        for env in &seen {
            let mut reply = env.frames.clone();
            reply.insert(0, Bytes::from_static(b"echo"));
            replies.send(&env.identity, reply).unwrap();
        }
        let reply_a = a.next().await.unwrap().unwrap();
        let reply_b = b.next().await.unwrap().unwrap();
        assert_eq!(&reply_a[1][..], b"from-a");
        assert_eq!(&reply_b[1][..], b"from-b");

        stop_tx.send(()).unwrap();
        server.await.unwrap();
        assert_eq!(replies.connected(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_reported() {
        let router = Router::bind("127.0.0.1:0", 1024).await.unwrap();
        let addr = router.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(router.run(tx, async move {
            let _ = stop_rx.await;
        }));

        let mut client = connect(addr).await;
        client.send(vec![Bytes::from_static(b"hi")]).await.unwrap();
        let Some(Inbound::Message(env)) = rx.recv().await else {
            panic!("expected a message");
        };
        drop(client);

        let Some(Inbound::Disconnected(identity)) = rx.recv().await else {
            panic!("expected a disconnect");
        };
        assert_eq!(identity, env.identity);

        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_with_full_reply_queue_is_dropped() {
        let router = Router::bind("127.0.0.1:0", 1024)
            .await
            .unwrap()
            .with_reply_queue_depth(2);
        let addr = router.local_addr().unwrap();
        let replies = router.replies();
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(router.run(tx, async move {
            let _ = stop_rx.await;
        }));

        let mut client = connect(addr).await;
        client.send(vec![Bytes::from_static(b"req")]).await.unwrap();
        let Some(Inbound::Message(env)) = rx.recv().await else {
            panic!("expected a message");
        };

        // The writer task gets no chance to run between these sends.
        replies.send(&env.identity, vec![Bytes::from_static(b"1")]).unwrap();
        replies.send(&env.identity, vec![Bytes::from_static(b"2")]).unwrap();
        let err = replies
            .send(&env.identity, vec![Bytes::from_static(b"3")])
            .unwrap_err();
        assert!(matches!(err, BrokerError::PeerBacklogged(_)));
        assert_eq!(err.kind(), blobgate_core::ErrorKind::Transport);
        assert_eq!(replies.connected(), 0);

        let Some(Inbound::Disconnected(identity)) = rx.recv().await else {
            panic!("expected a disconnect");
        };
        assert_eq!(identity, env.identity);
        let err = replies.send(&env.identity, vec![Bytes::new()]).unwrap_err();
        assert!(matches!(err, BrokerError::PeerGone(_)));

        drop(client);
        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reply_to_unknown_peer_fails() {
        let replies = ReplySender::default();
        let err = replies
            .send(&Identity::generate(), vec![Bytes::new()])
            .unwrap_err();
        assert!(matches!(err, BrokerError::PeerGone(_)));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = Router::bind("127.0.0.1:0", 1024).await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let err = Router::bind(&addr, 1024).await.err().unwrap();
        assert!(matches!(err, BrokerError::Bind { .. }));
        assert!(err.to_string().contains(&addr));
    }
}
