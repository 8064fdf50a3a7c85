//! Client side of a hub session.
//!
//! [`Client::connect`] performs the greeting, learns the client's identifier
//! and starts the connection. Everything the hub sends afterwards is routed
//! to a [`ClientHandler`]; roster updates are applied to [`Client::peers`]
//! before the join/leave callbacks run.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use netgame_core::PeerId;
use netgame_protocol::{GOODBYE_REASON, RosterChange, SHUTDOWN_REASON, StatusUpdate};
use netgame_server::{
    CloseCause, Connection, ConnectionOwner, ExtraHandshake, HandshakeError, HandshakeStream,
    NoExtraHandshake, connect_handshake, with_timeout,
};

use crate::error::{ClientError, ClientResult};

/// Callbacks for a client session.
///
/// They run on the connection's receiver task, or for close notifications on
/// whichever task noticed the close. They must not block, but may call back
/// into the [`Client`] (for example to send).
pub trait ClientHandler<M>: Send + Sync + 'static {
    /// A message from the hub.
    fn on_message(&self, client: &Client, message: M);

    /// A peer joined. [`Client::peers`] already includes it.
    fn on_peer_joined(&self, _client: &Client, _id: PeerId) {}

    /// A peer left. [`Client::peers`] no longer includes it.
    fn on_peer_left(&self, _client: &Client, _id: PeerId) {}

    /// The session ended because of an error or a hub-side close.
    fn on_closed_by_error(&self, _client: &Client, reason: &str) {
        warn!(reason = %reason, "connection to hub closed");
    }

    /// The hub shut down.
    fn on_server_shutdown(&self, _client: &Client, reason: &str) {
        info!(reason = %reason, "hub shut down");
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Hub host name or address.
    pub host: String,
    /// Hub port.
    pub port: u16,
    /// Upper bound on connect plus handshake.
    pub timeout: Duration,
    /// Initial auto-reset flag.
    pub auto_reset: bool,
}

impl ConnectOptions {
    /// Options with a 5 second timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            auto_reset: false,
        }
    }

    /// Builder: set the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set auto reset.
    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    /// `host:port`, as passed to the resolver.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct ClientInner {
    conn: Connection,
    roster: Mutex<Vec<PeerId>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.conn.disconnect(Some(GOODBYE_REASON));
    }
}

/// Handle to a connected client. Cheap to clone; dropping the last handle
/// disconnects.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("hub", &self.hub_addr())
            .field("state", &self.inner.conn.state())
            .finish()
    }
}

impl Client {
    /// Connects to a hub with default options.
    pub async fn connect<M, H>(host: &str, port: u16, handler: H) -> ClientResult<Self>
    where
        M: DeserializeOwned + Send + 'static,
        H: ClientHandler<M>,
    {
        Self::connect_with(ConnectOptions::new(host, port), handler).await
    }

    /// Connects to a hub.
    pub async fn connect_with<M, H>(options: ConnectOptions, handler: H) -> ClientResult<Self>
    where
        M: DeserializeOwned + Send + 'static,
        H: ClientHandler<M>,
    {
        Self::connect_with_handshake(options, handler, NoExtraHandshake).await
    }

    /// Connects to a hub, running `extra` once the identifier is known.
    pub async fn connect_with_handshake<M, H, E>(
        options: ConnectOptions,
        handler: H,
        extra: E,
    ) -> ClientResult<Self>
    where
        M: DeserializeOwned + Send + 'static,
        H: ClientHandler<M>,
        E: ExtraHandshake,
    {
        let target = options.target();
        debug!(hub = %target, "connecting to hub");

        let (id, handshake) = with_timeout(options.timeout, async {
            let stream = TcpStream::connect(&target).await?;
            let mut handshake = HandshakeStream::new(stream)?;
            let id = connect_handshake(&mut handshake, &extra).await?;
            Ok::<_, HandshakeError>((id, handshake))
        })
        .await
        .map_err(|source| ClientError::ConnectFailed {
            addr: target.clone(),
            source,
        })?;

        let (stream, hub_addr) = handshake.into_inner();
        let (conn, io) = Connection::new(id, stream, hub_addr);
        conn.set_auto_reset(options.auto_reset);

        let inner = Arc::new(ClientInner {
            conn,
            roster: Mutex::new(Vec::new()),
        });
        let owner: Arc<dyn ConnectionOwner<M>> = Arc::new(ClientOwner {
            client: Arc::downgrade(&inner),
            handler,
        });
        io.start::<M>(owner);

        info!(peer = %id, hub = %hub_addr, "connected to hub");
        Ok(Self { inner })
    }

    /// Identifier assigned by the hub.
    pub fn id(&self) -> PeerId {
        self.inner.conn.id()
    }

    /// Address of the hub.
    pub fn hub_addr(&self) -> SocketAddr {
        self.inner.conn.peer_addr()
    }

    /// Last roster received from the hub, sorted. Empty once closed.
    pub fn peers(&self) -> Vec<PeerId> {
        self.roster().clone()
    }

    /// Returns true while messages can be sent.
    pub fn is_connected(&self) -> bool {
        self.inner.conn.is_open()
    }

    /// Encodes and queues a message for the hub. Never blocks.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> ClientResult<()> {
        self.inner.conn.send(message)?;
        Ok(())
    }

    /// Says goodbye to the hub; the connection closes once that is flushed.
    /// Does nothing if already disconnecting.
    pub fn disconnect(&self) {
        if self.inner.conn.disconnect(Some(GOODBYE_REASON)).is_ok() {
            info!(peer = %self.id(), "disconnecting from hub");
        }
    }

    /// Queues a reset marker. JSON keeps no back-references, so this only
    /// preserves ordering with respect to other queued items.
    pub fn reset_output(&self) -> ClientResult<()> {
        self.inner.conn.reset_output()?;
        Ok(())
    }

    /// Returns the auto-reset flag.
    pub fn auto_reset(&self) -> bool {
        self.inner.conn.auto_reset()
    }

    /// Sets the auto-reset flag.
    pub fn set_auto_reset(&self, auto_reset: bool) {
        self.inner.conn.set_auto_reset(auto_reset);
    }

    /// Waits until the connection is fully closed.
    pub async fn closed(&self) {
        self.inner.conn.closed().await;
    }

    fn roster(&self) -> MutexGuard<'_, Vec<PeerId>> {
        self.inner
            .roster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct ClientOwner<H> {
    client: Weak<ClientInner>,
    handler: H,
}

impl<H> ClientOwner<H> {
    fn client(&self) -> Option<Client> {
        self.client.upgrade().map(|inner| Client { inner })
    }
}

impl<M, H> ConnectionOwner<M> for ClientOwner<H>
where
    M: Send + 'static,
    H: ClientHandler<M>,
{
    fn message_received(&self, _conn: &Connection, message: M) {
        if let Some(client) = self.client() {
            self.handler.on_message(&client, message);
        }
    }

    fn status_received(&self, _conn: &Connection, status: StatusUpdate) {
        let Some(client) = self.client() else { return };
        *client.roster() = status.roster;

        match status.change {
            RosterChange::Joined => self.handler.on_peer_joined(&client, status.peer),
            RosterChange::Left => self.handler.on_peer_left(&client, status.peer),
        }
    }

    fn connection_closed(&self, conn: &Connection, cause: CloseCause) {
        let Some(client) = self.client() else {
            debug!(peer = %conn.id(), "client dropped before close");
            return;
        };
        client.roster().clear();

        match cause {
            CloseCause::Local => debug!(peer = %conn.id(), "disconnected from hub"),
            CloseCause::Remote { reason: Some(reason) } if reason == SHUTDOWN_REASON => {
                self.handler.on_server_shutdown(&client, &reason);
            }
            CloseCause::Remote { reason } => {
                let reason = format!(
                    "closed by hub: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.handler.on_closed_by_error(&client, &reason);
            }
            CloseCause::Error(reason) => self.handler.on_closed_by_error(&client, &reason),
        }
    }
}
