//! Session setup on a freshly connected socket.
//!
//! The client greets, the hub answers with the next identifier, then both
//! sides run their [`ExtraHandshake`] hook over the same framed stream.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::debug;

use netgame_core::PeerId;
use netgame_protocol::{FrameReader, FrameWriter, GREETING};

use crate::error::{HandshakeError, HandshakeResult};

/// Boxed future returned by [`ExtraHandshake::handshake`].
pub type HandshakeFuture<'a> = Pin<Box<dyn Future<Output = HandshakeResult<()>> + Send + 'a>>;

/// Application hook run after the identifier is assigned and before the
/// session starts. Returning an error aborts the connection.
pub trait ExtraHandshake: Send + Sync + 'static {
    /// Exchanges extra setup data with the peer.
    fn handshake<'a>(&'a self, id: PeerId, stream: &'a mut HandshakeStream) -> HandshakeFuture<'a>;
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtraHandshake;

impl ExtraHandshake for NoExtraHandshake {
    fn handshake<'a>(&'a self, _id: PeerId, _stream: &'a mut HandshakeStream) -> HandshakeFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Framed access to a socket during the handshake.
pub struct HandshakeStream {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl HandshakeStream {
    /// Wraps a connected socket.
    pub fn new(stream: TcpStream) -> HandshakeResult<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self { stream, peer_addr })
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads the next raw frame body.
    async fn read_frame(&mut self) -> HandshakeResult<Vec<u8>> {
        FrameReader::new(&mut self.stream)
            .read_frame()
            .await?
            .ok_or(HandshakeError::Closed)
    }

    /// Reads and decodes one message.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> HandshakeResult<T> {
        let body = self.read_frame().await?;
        serde_json::from_slice(&body).map_err(|e| HandshakeError::Protocol(e.into()))
    }

    /// Encodes and writes one message.
    pub async fn write_message<T: Serialize + ?Sized>(&mut self, message: &T) -> HandshakeResult<()> {
        let mut writer = FrameWriter::new(&mut self.stream);
        writer.write_message(message).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Releases the socket for the session.
    pub fn into_inner(self) -> (TcpStream, SocketAddr) {
        (self.stream, self.peer_addr)
    }
}

/// Hands out identifiers starting at 1, never reusing one.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Creates an allocator whose first identifier is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(PeerId::FIRST.get()),
        }
    }

    /// Takes the next identifier, or `None` once the counter is exhausted.
    pub fn allocate(&self) -> Option<PeerId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .ok()
            .and_then(PeerId::new)
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }

    /// Number of identifiers handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - PeerId::FIRST.get()
    }
}

/// Runs `fut` with the handshake deadline.
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = HandshakeResult<T>>,
) -> HandshakeResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| HandshakeError::Timeout { after: timeout })?
}

/// Hub side: checks the greeting, assigns an identifier and runs the hook.
///
/// No identifier is consumed when the greeting is wrong. Once the identifier
/// has been sent it is spent, even if the hook fails.
pub async fn accept_handshake(
    stream: &mut HandshakeStream,
    ids: &IdAllocator,
    extra: &dyn ExtraHandshake,
) -> HandshakeResult<PeerId> {
    let body = stream.read_frame().await?;
    match serde_json::from_slice::<String>(&body) {
        Ok(greeting) if greeting == GREETING => {}
        _ => {
            let received = String::from_utf8_lossy(&body).chars().take(64).collect();
            return Err(HandshakeError::UnexpectedGreeting { received });
        }
    }

    let id = ids.allocate().ok_or(HandshakeError::IdsExhausted)?;
    debug!(peer = %id, addr = %stream.peer_addr(), "greeting accepted");
    stream.write_message(&id).await?;
    extra.handshake(id, stream).await?;
    Ok(id)
}

/// Client side: greets the hub, learns its identifier and runs the hook.
pub async fn connect_handshake(
    stream: &mut HandshakeStream,
    extra: &dyn ExtraHandshake,
) -> HandshakeResult<PeerId> {
    stream.write_message(GREETING).await?;
    let id: PeerId = stream.read_message().await?;
    debug!(peer = %id, hub = %stream.peer_addr(), "identifier assigned");
    extra.handshake(id, stream).await?;
    Ok(id)
}
