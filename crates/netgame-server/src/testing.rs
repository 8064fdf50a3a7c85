//! Shared helpers for unit tests.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use netgame_protocol::StatusUpdate;

use crate::connection::{CloseCause, Connection, ConnectionOwner};
use crate::handshake::{HandshakeStream, NoExtraHandshake, connect_handshake};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Two ends of a loopback TCP connection, each with its remote address.
pub async fn connected_pair() -> ((TcpStream, SocketAddr), (TcpStream, SocketAddr)) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = client.unwrap();
    let (server, client_addr) = accepted.unwrap();
    ((server, client_addr), (client, addr))
}

/// Connects a bare connection to a hub and starts it with a recording owner.
pub async fn join_hub<M>(addr: SocketAddr) -> (Connection, mpsc::UnboundedReceiver<OwnerEvent<M>>)
where
    M: DeserializeOwned + Send + 'static,
{
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut handshake = HandshakeStream::new(stream).unwrap();
    let id = connect_handshake(&mut handshake, &NoExtraHandshake)
        .await
        .unwrap();
    let (stream, peer_addr) = handshake.into_inner();
    let (conn, io) = Connection::new(id, stream, peer_addr);
    let (owner, events) = RecordingOwner::<M>::new();
    io.start::<M>(owner);
    (conn, events)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerEvent<M> {
    Message(M),
    Status(StatusUpdate),
    Closed(CloseCause),
}

/// Owner that forwards every callback to a channel.
pub struct RecordingOwner<M> {
    events: mpsc::UnboundedSender<OwnerEvent<M>>,
    closed: AtomicUsize,
    _marker: PhantomData<fn(M)>,
}

impl<M: Send + 'static> RecordingOwner<M> {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OwnerEvent<M>>) {
        let (events, rx) = mpsc::unbounded_channel();
        let owner = Arc::new(Self {
            events,
            closed: AtomicUsize::new(0),
            _marker: PhantomData,
        });
        (owner, rx)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<M: Send + 'static> ConnectionOwner<M> for RecordingOwner<M> {
    fn message_received(&self, _conn: &Connection, message: M) {
        let _ = self.events.send(OwnerEvent::Message(message));
    }

    fn status_received(&self, _conn: &Connection, status: StatusUpdate) {
        let _ = self.events.send(OwnerEvent::Status(status));
    }

    fn connection_closed(&self, _conn: &Connection, cause: CloseCause) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(OwnerEvent::Closed(cause));
    }
}

/// Waits for the next event, failing the test if none arrives in time.
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
