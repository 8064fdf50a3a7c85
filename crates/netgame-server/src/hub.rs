//! The hub: accepts peers, keeps the roster and relays messages.
//!
//! Every hook on [`HubHandler`] runs on one dispatcher task, in the order the
//! hub observed the events. For a given peer that order is always
//! `peer_connected`, its messages, then `peer_disconnected`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use netgame_core::PeerId;
use netgame_protocol::{
    ForwardedMessage, Frame, RosterChange, SHUTDOWN_REASON, StatusUpdate, encode_message,
};

use crate::config::HubConfig;
use crate::connection::{
    CloseCause, Connection, ConnectionIo, ConnectionOwner, EncodedFrame, encode_frame,
};
use crate::error::{HandshakeError, HubError, HubResult};
use crate::handshake::{
    ExtraHandshake, HandshakeStream, IdAllocator, NoExtraHandshake, accept_handshake,
    with_timeout,
};

/// Application hooks for a hub. All of them run on the dispatcher task and
/// must not block.
pub trait HubHandler<M>: Send + Sync + 'static {
    /// A message arrived from `from`.
    fn message_received(&self, hub: &Hub, from: PeerId, message: M);

    /// A peer finished its handshake and joined the roster.
    fn peer_connected(&self, _hub: &Hub, id: PeerId) {
        debug!(peer = %id, "peer connected");
    }

    /// A peer left the roster.
    fn peer_disconnected(&self, _hub: &Hub, id: PeerId) {
        debug!(peer = %id, "peer disconnected");
    }

    /// A peer's connection failed. Followed by `peer_disconnected`.
    fn connection_error(&self, _hub: &Hub, id: PeerId, reason: &str) {
        warn!(peer = %id, reason = %reason, "connection error");
    }
}

/// Forwards every message to all peers, sender included, as a
/// [`ForwardedMessage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayHandler;

impl<M> HubHandler<M> for RelayHandler
where
    M: Serialize + Send + 'static,
{
    fn message_received(&self, hub: &Hub, from: PeerId, message: M) {
        if let Err(e) = hub.send_to_all(&ForwardedMessage::new(from, message)) {
            warn!(peer = %from, error = %e, "failed to relay message");
        }
    }
}

/// Point-in-time view of a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStatus {
    /// When the hub started listening.
    pub started_at: DateTime<Utc>,
    /// Seconds since `started_at`.
    pub uptime_seconds: u64,
    /// Connected peers, sorted.
    pub peers: Vec<PeerId>,
    /// Identifiers handed out so far, including spent ones.
    pub ids_issued: u64,
    /// Whether new connections are being accepted.
    pub listening: bool,
}

type Event = Box<dyn FnOnce(&Hub) + Send>;
type StartFn = Box<dyn Fn(&Hub, ConnectionIo) + Send + Sync>;

enum Dispatch {
    Run(Event),
    Stop,
}

struct Acceptor {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ListenerSlot {
    running: Option<Acceptor>,
    stopped: Option<JoinHandle<()>>,
}

struct HubInner {
    config: HubConfig,
    started_at: DateTime<Utc>,
    roster: Mutex<BTreeMap<PeerId, Connection>>,
    ids: IdAllocator,
    extra: Box<dyn ExtraHandshake>,
    start: StartFn,
    events: mpsc::UnboundedSender<Dispatch>,
    listener: Mutex<ListenerSlot>,
    auto_reset: AtomicBool,
    shutting_down: AtomicBool,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        let slot = self.listener.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(acceptor) = slot.running.take() {
            acceptor.handle.abort();
        }
    }
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("local_addr", &self.local_addr())
            .field("peers", &self.peers())
            .finish()
    }
}

impl Hub {
    /// Binds the configured address and starts accepting peers.
    pub async fn listen<M, H>(config: HubConfig, handler: H) -> HubResult<Self>
    where
        M: DeserializeOwned + Send + 'static,
        H: HubHandler<M>,
    {
        Self::listen_with_handshake(config, handler, NoExtraHandshake).await
    }

    /// Like [`Hub::listen`], running `extra` after each identifier is sent.
    pub async fn listen_with_handshake<M, H, E>(
        config: HubConfig,
        handler: H,
        extra: E,
    ) -> HubResult<Self>
    where
        M: DeserializeOwned + Send + 'static,
        H: HubHandler<M>,
        E: ExtraHandshake,
    {
        let addr = config.socket_addr(config.port);
        let listener = bind(addr).await?;

        let handler: Arc<dyn HubHandler<M>> = Arc::new(handler);
        let start: StartFn = Box::new(move |hub: &Hub, io: ConnectionIo| {
            let owner: Arc<dyn ConnectionOwner<M>> = Arc::new(HubOwner {
                hub: Arc::downgrade(&hub.inner),
                handler: handler.clone(),
            });
            io.start::<M>(owner);
        });

        let (events, queue) = mpsc::unbounded_channel();
        let hub = Self {
            inner: Arc::new(HubInner {
                auto_reset: AtomicBool::new(config.auto_reset),
                config,
                started_at: Utc::now(),
                roster: Mutex::new(BTreeMap::new()),
                ids: IdAllocator::new(),
                extra: Box::new(extra),
                start,
                events,
                listener: Mutex::new(ListenerSlot::default()),
                shutting_down: AtomicBool::new(false),
            }),
        };

        tokio::spawn(run_dispatcher(Arc::downgrade(&hub.inner), queue));
        hub.spawn_acceptor(listener)?;
        Ok(hub)
    }

    /// Address the listener is bound to, or `None` while not accepting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener_slot().running.as_ref().map(|a| a.addr)
    }

    /// Sorted snapshot of connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.roster().keys().copied().collect()
    }

    /// Returns a point-in-time view of the hub.
    pub fn status(&self) -> HubStatus {
        let uptime = Utc::now() - self.inner.started_at;
        HubStatus {
            started_at: self.inner.started_at,
            uptime_seconds: uptime.num_seconds().max(0) as u64,
            peers: self.peers(),
            ids_issued: self.inner.ids.issued(),
            listening: self.local_addr().is_some(),
        }
    }

    /// Queues a message for one peer.
    pub fn send_to_one<T: Serialize + ?Sized>(&self, id: PeerId, message: &T) -> HubResult<()> {
        let conn = self.connection(id)?;
        conn.send(message)?;
        Ok(())
    }

    /// Queues a message for every peer. Returns how many accepted it.
    pub fn send_to_all<T: Serialize + ?Sized>(&self, message: &T) -> HubResult<usize> {
        let frame = encode_frame(message).map_err(HubError::InvalidMessage)?;
        Ok(self.fan_out(&frame, None))
    }

    /// Queues a message for every peer except `except`.
    pub fn send_to_all_except<T: Serialize + ?Sized>(
        &self,
        except: PeerId,
        message: &T,
    ) -> HubResult<usize> {
        let frame = encode_frame(message).map_err(HubError::InvalidMessage)?;
        Ok(self.fan_out(&frame, Some(except)))
    }

    /// Sends `reason` to one peer and closes its connection once flushed.
    pub fn disconnect_peer(&self, id: PeerId, reason: &str) -> HubResult<()> {
        let conn = self.connection(id)?;
        conn.disconnect(Some(reason))?;
        info!(peer = %id, reason = %reason, "disconnecting peer");
        Ok(())
    }

    /// Queues a reset marker on every open connection.
    pub fn reset_output(&self) {
        for conn in self.roster().values() {
            let _ = conn.reset_output();
        }
    }

    /// Sets the auto-reset flag on every connection, current and future.
    pub fn set_auto_reset(&self, auto_reset: bool) {
        self.inner.auto_reset.store(auto_reset, Ordering::Relaxed);
        for conn in self.roster().values() {
            conn.set_auto_reset(auto_reset);
        }
    }

    /// Stops accepting new peers. Existing connections are untouched.
    pub fn shutdown_listener(&self) {
        let mut slot = self.listener_slot();
        if let Some(acceptor) = slot.running.take() {
            acceptor.handle.abort();
            slot.stopped = Some(acceptor.handle);
            info!(addr = %acceptor.addr, "listener stopped");
        }
    }

    /// Binds `port` again after [`Hub::shutdown_listener`].
    pub async fn restart_listener(&self, port: u16) -> HubResult<()> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(HubError::ShutDown);
        }

        let stopped = {
            let mut slot = self.listener_slot();
            if let Some(acceptor) = &slot.running {
                return Err(HubError::ListenerRunning {
                    addr: acceptor.addr,
                });
            }
            slot.stopped.take()
        };
        if let Some(handle) = stopped {
            // Cancelled; waiting releases the old socket.
            let _ = handle.await;
        }

        let listener = bind(self.inner.config.socket_addr(port)).await?;
        self.spawn_acceptor(listener)
    }

    /// Closes every connection and stops the hub.
    ///
    /// Peers receive a disconnect marker carrying [`SHUTDOWN_REASON`]. Any
    /// connection still open after the configured grace period is closed.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_listener();

        let conns: Vec<Connection> = self.roster().values().cloned().collect();
        info!(peers = conns.len(), "shutting down hub");
        for conn in &conns {
            let _ = conn.disconnect(Some(SHUTDOWN_REASON));
        }

        let grace = self.inner.config.shutdown_grace;
        let drained = join_all(conns.iter().map(Connection::closed));
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!(grace = ?grace, "peers did not close in time, forcing");
            for conn in &conns {
                conn.close();
            }
            join_all(conns.iter().map(Connection::closed)).await;
        }

        let _ = self.inner.events.send(Dispatch::Stop);
        info!("hub stopped");
    }

    fn roster(&self) -> MutexGuard<'_, BTreeMap<PeerId, Connection>> {
        self.inner
            .roster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listener_slot(&self) -> MutexGuard<'_, ListenerSlot> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self, id: PeerId) -> HubResult<Connection> {
        self.roster()
            .get(&id)
            .cloned()
            .ok_or(HubError::UnknownPeer { id })
    }

    fn fan_out(&self, frame: &EncodedFrame, except: Option<PeerId>) -> usize {
        let targets: Vec<Connection> = self
            .roster()
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(_, conn)| conn.clone())
            .collect();

        targets
            .iter()
            .filter(|conn| conn.send_encoded(frame.clone()).is_ok())
            .count()
    }

    fn dispatch(&self, event: impl FnOnce(&Hub) + Send + 'static) {
        let _ = self.inner.events.send(Dispatch::Run(Box::new(event)));
    }

    fn spawn_acceptor(&self, listener: TcpListener) -> HubResult<()> {
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(run_acceptor(Arc::downgrade(&self.inner), listener));

        let mut slot = self.listener_slot();
        if let Some(existing) = &slot.running {
            handle.abort();
            return Err(HubError::ListenerRunning {
                addr: existing.addr,
            });
        }
        slot.running = Some(Acceptor { addr, handle });
        info!(addr = %addr, "hub listening");
        Ok(())
    }

    async fn setup_connection(self, stream: TcpStream, addr: SocketAddr) {
        let inner = &self.inner;
        let result = with_timeout(inner.config.handshake_timeout, async {
            let mut handshake = HandshakeStream::new(stream)?;
            let id = accept_handshake(&mut handshake, &inner.ids, inner.extra.as_ref()).await?;
            Ok::<_, HandshakeError>((id, handshake))
        })
        .await;

        match result {
            Ok((id, handshake)) => {
                let (stream, peer_addr) = handshake.into_inner();
                let (_conn, io) = Connection::new(id, stream, peer_addr);
                (inner.start)(&self, io);
            }
            Err(e) => warn!(addr = %addr, error = %e, "handshake failed"),
        }
    }

    /// Adds an opened connection to the roster and announces it.
    fn admit<M: Send + 'static>(&self, conn: &Connection, handler: Arc<dyn HubHandler<M>>) {
        let id = conn.id();
        {
            let mut roster = self.roster();
            if self.inner.shutting_down.load(Ordering::Acquire) {
                drop(roster);
                debug!(peer = %id, "hub shutting down, refusing peer");
                conn.close();
                return;
            }
            conn.set_auto_reset(self.inner.auto_reset.load(Ordering::Relaxed));
            roster.insert(id, conn.clone());
            broadcast_status(&roster, id, RosterChange::Joined);
        }

        info!(peer = %id, addr = %conn.peer_addr(), "peer joined");
        self.dispatch(move |hub| handler.peer_connected(hub, id));
    }

    /// Removes a closed connection and announces the departure.
    fn release<M: Send + 'static>(
        &self,
        id: PeerId,
        cause: CloseCause,
        handler: Arc<dyn HubHandler<M>>,
    ) {
        {
            let mut roster = self.roster();
            if roster.remove(&id).is_none() {
                return;
            }
            if !self.inner.shutting_down.load(Ordering::Acquire) {
                broadcast_status(&roster, id, RosterChange::Left);
            }
        }

        info!(peer = %id, cause = ?cause, "peer left");
        self.dispatch(move |hub| {
            if let CloseCause::Error(reason) = &cause {
                handler.connection_error(hub, id, reason);
            }
            handler.peer_disconnected(hub, id);
        });
    }
}

/// Queues a roster snapshot on every connection in `roster`. Runs under the
/// roster lock so all peers see updates in the same order.
fn broadcast_status(roster: &BTreeMap<PeerId, Connection>, peer: PeerId, change: RosterChange) {
    let status = StatusUpdate::new(peer, change, roster.keys().copied().collect());
    let frame: EncodedFrame = match encode_message(&Frame::<()>::Status(status)) {
        Ok(bytes) => Arc::from(bytes),
        Err(e) => {
            warn!(peer = %peer, error = %e, "failed to encode status update");
            return;
        }
    };

    for conn in roster.values() {
        let _ = conn.send_encoded(frame.clone());
    }
}

async fn bind(addr: SocketAddr) -> HubResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| HubError::bind_failed(addr, e))
}

async fn run_acceptor(hub: Weak<HubInner>, listener: TcpListener) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let Some(inner) = hub.upgrade() else { break };

        debug!(addr = %addr, "accepted connection");
        tokio::spawn(Hub { inner }.setup_connection(stream, addr));
    }
}

async fn run_dispatcher(hub: Weak<HubInner>, mut queue: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(Dispatch::Run(event)) = queue.recv().await {
        let Some(inner) = hub.upgrade() else { break };
        event(&Hub { inner });
    }
    debug!("dispatcher stopped");
}

/// Connection owner installed on every hub-side connection.
struct HubOwner<M> {
    hub: Weak<HubInner>,
    handler: Arc<dyn HubHandler<M>>,
}

impl<M> HubOwner<M> {
    fn hub(&self) -> Option<Hub> {
        self.hub.upgrade().map(|inner| Hub { inner })
    }
}

impl<M: Send + 'static> ConnectionOwner<M> for HubOwner<M> {
    fn connection_opened(&self, conn: &Connection) {
        match self.hub() {
            Some(hub) => hub.admit(conn, self.handler.clone()),
            None => conn.close(),
        }
    }

    fn message_received(&self, conn: &Connection, message: M) {
        let Some(hub) = self.hub() else { return };
        let from = conn.id();
        let handler = self.handler.clone();
        hub.dispatch(move |hub| handler.message_received(hub, from, message));
    }

    fn status_received(&self, conn: &Connection, _status: StatusUpdate) {
        conn.fail("unexpected status frame from peer");
    }

    fn connection_closed(&self, conn: &Connection, cause: CloseCause) {
        if let Some(hub) = self.hub() {
            hub.release(conn.id(), cause, self.handler.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::handshake::{HandshakeFuture, connect_handshake};
    use crate::testing::{OwnerEvent, join_hub, next_event};
    use netgame_protocol::{FrameWriter, GOODBYE_REASON};

    type Relayed = ForwardedMessage<String>;

    fn id(n: u64) -> PeerId {
        PeerId::new(n).unwrap()
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HubEvent {
        Connected(PeerId),
        Message(PeerId, String),
        Error(PeerId, String),
        Disconnected(PeerId),
    }

    /// Records every hook, then relays like [`RelayHandler`].
    struct Recorder(mpsc::UnboundedSender<HubEvent>);

    impl Recorder {
        fn new() -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self(tx), rx)
        }
    }

    impl HubHandler<String> for Recorder {
        fn message_received(&self, hub: &Hub, from: PeerId, message: String) {
            let _ = self.0.send(HubEvent::Message(from, message.clone()));
            RelayHandler.message_received(hub, from, message);
        }

        fn peer_connected(&self, _hub: &Hub, id: PeerId) {
            let _ = self.0.send(HubEvent::Connected(id));
        }

        fn peer_disconnected(&self, _hub: &Hub, id: PeerId) {
            let _ = self.0.send(HubEvent::Disconnected(id));
        }

        fn connection_error(&self, _hub: &Hub, id: PeerId, reason: &str) {
            let _ = self.0.send(HubEvent::Error(id, reason.to_string()));
        }
    }

    async fn start_hub() -> (Hub, SocketAddr, mpsc::UnboundedReceiver<HubEvent>) {
        let (recorder, events) = Recorder::new();
        let config = HubConfig::local().with_shutdown_grace(Duration::from_millis(500));
        let hub = Hub::listen::<String, _>(config, recorder).await.unwrap();
        let addr = hub.local_addr().unwrap();
        (hub, addr, events)
    }

    async fn expect_status(
        events: &mut mpsc::UnboundedReceiver<OwnerEvent<Relayed>>,
    ) -> StatusUpdate {
        match next_event(events).await {
            OwnerEvent::Status(status) => status,
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ids_increase_despite_bad_greeting() {
        let (hub, addr, _events) = start_hub().await;

        let (first, _first_events) = join_hub::<Relayed>(addr).await;
        assert_eq!(first.id(), id(1));

        let mut rogue = TcpStream::connect(addr).await.unwrap();
        let mut writer = FrameWriter::new(&mut rogue);
        writer.write_message("Hello Server").await.unwrap();
        writer.flush().await.unwrap();
        let mut reader = netgame_protocol::FrameReader::new(&mut rogue);
        assert!(matches!(reader.read_frame().await, Ok(None) | Err(_)));

        let (second, _second_events) = join_hub::<Relayed>(addr).await;
        assert_eq!(second.id(), id(2));
        assert_eq!(hub.status().ids_issued, 2);
    }

    #[tokio::test]
    async fn roster_updates_reach_every_peer() {
        let (hub, addr, mut hub_events) = start_hub().await;

        let (_one, mut one_events) = join_hub::<Relayed>(addr).await;
        let status = expect_status(&mut one_events).await;
        assert_eq!(status, StatusUpdate::new(id(1), RosterChange::Joined, vec![id(1)]));
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(id(1)));

        let (two, mut two_events) = join_hub::<Relayed>(addr).await;
        let joined = StatusUpdate::new(id(2), RosterChange::Joined, vec![id(1), id(2)]);
        assert_eq!(expect_status(&mut one_events).await, joined);
        assert_eq!(expect_status(&mut two_events).await, joined);
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(id(2)));

        two.disconnect(Some(GOODBYE_REASON)).unwrap();
        let left = expect_status(&mut one_events).await;
        assert_eq!(left, StatusUpdate::new(id(2), RosterChange::Left, vec![id(1)]));
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Disconnected(id(2)));

        assert_eq!(hub.peers(), vec![id(1)]);
        assert!(matches!(
            hub.send_to_one(id(2), "gone"),
            Err(HubError::UnknownPeer { .. })
        ));
    }

    #[tokio::test]
    async fn relay_forwards_to_everyone() {
        let (_hub, addr, mut hub_events) = start_hub().await;
        let (one, mut one_events) = join_hub::<Relayed>(addr).await;
        expect_status(&mut one_events).await;
        let (_two, mut two_events) = join_hub::<Relayed>(addr).await;
        expect_status(&mut one_events).await;
        expect_status(&mut two_events).await;

        one.send("ping").unwrap();

        let expected = OwnerEvent::Message(ForwardedMessage::new(id(1), "ping".to_string()));
        assert_eq!(next_event(&mut one_events).await, expected);
        assert_eq!(next_event(&mut two_events).await, expected);

        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(id(1)));
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(id(2)));
        assert_eq!(
            next_event(&mut hub_events).await,
            HubEvent::Message(id(1), "ping".into())
        );
    }

    #[tokio::test]
    async fn targeted_sends() {
        let (hub, addr, _events) = start_hub().await;
        let (_one, mut one_events) = join_hub::<String>(addr).await;
        let (_two, mut two_events) = join_hub::<String>(addr).await;
        while hub.peers().len() < 2 {
            tokio::task::yield_now().await;
        }

        hub.send_to_one(id(2), "just you").unwrap();
        assert_eq!(hub.send_to_all_except(id(2), "not you").unwrap(), 1);
        assert!(matches!(
            hub.send_to_one(id(9), "nobody"),
            Err(HubError::UnknownPeer { .. })
        ));

        let mut one_messages = Vec::new();
        while one_messages.is_empty() {
            if let OwnerEvent::Message(text) = next_event(&mut one_events).await {
                one_messages.push(text);
            }
        }
        assert_eq!(one_messages, vec!["not you".to_string()]);

        loop {
            if let OwnerEvent::Message(text) = next_event(&mut two_events).await {
                assert_eq!(text, "just you");
                break;
            }
        }
    }

    #[tokio::test]
    async fn abrupt_close_reports_error_then_disconnect() {
        let (hub, addr, mut hub_events) = start_hub().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut handshake = HandshakeStream::new(stream).unwrap();
        let peer = connect_handshake(&mut handshake, &NoExtraHandshake)
            .await
            .unwrap();
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(peer));

        // Unread data would turn the close into a reset.
        let joined: Frame<String> = handshake.read_message().await.unwrap();
        assert!(matches!(joined, Frame::Status(_)));
        drop(handshake);

        match next_event(&mut hub_events).await {
            HubEvent::Error(from, reason) => {
                assert_eq!(from, peer);
                assert!(reason.contains("unexpectedly"), "{reason}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Disconnected(peer));
        assert!(hub.peers().is_empty());
    }

    #[tokio::test]
    async fn status_frame_from_peer_is_a_decode_failure() {
        let (hub, addr, mut hub_events) = start_hub().await;
        let (conn, mut events) = join_hub::<Relayed>(addr).await;
        let peer = conn.id();
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(peer));

        let forged = StatusUpdate::new(peer, RosterChange::Joined, vec![peer]);
        let frame = encode_message(&Frame::<()>::Status(forged)).unwrap();
        conn.send_encoded(Arc::from(frame)).unwrap();

        match next_event(&mut hub_events).await {
            HubEvent::Error(from, reason) => {
                assert_eq!(from, peer);
                assert!(reason.contains("unexpected status"), "{reason}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Disconnected(peer));
        assert!(hub.peers().is_empty());

        loop {
            if let OwnerEvent::Closed(_) = next_event(&mut events).await {
                break;
            }
        }
    }

    #[tokio::test]
    async fn disconnect_peer_sends_reason() {
        let (hub, addr, mut hub_events) = start_hub().await;
        let (conn, mut events) = join_hub::<Relayed>(addr).await;
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(conn.id()));

        hub.disconnect_peer(conn.id(), "kicked").unwrap();

        loop {
            match next_event(&mut events).await {
                OwnerEvent::Status(_) => continue,
                OwnerEvent::Closed(cause) => {
                    assert_eq!(
                        cause,
                        CloseCause::Remote {
                            reason: Some("kicked".into())
                        }
                    );
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Disconnected(conn.id()));
    }

    #[tokio::test]
    async fn shutdown_notifies_peers() {
        let (hub, addr, _events) = start_hub().await;
        let (conn, mut events) = join_hub::<Relayed>(addr).await;
        expect_status(&mut events).await;

        hub.shutdown().await;

        assert_eq!(
            next_event(&mut events).await,
            OwnerEvent::Closed(CloseCause::Remote {
                reason: Some(SHUTDOWN_REASON.into())
            })
        );
        conn.closed().await;

        let status = hub.status();
        assert!(status.peers.is_empty());
        assert!(!status.listening);
        assert!(matches!(
            hub.restart_listener(0).await,
            Err(HubError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn listener_stops_and_restarts() {
        let (hub, addr, _events) = start_hub().await;
        let (_one, _one_events) = join_hub::<Relayed>(addr).await;

        hub.shutdown_listener();
        assert!(!hub.status().listening);
        assert_eq!(hub.local_addr(), None);

        hub.restart_listener(addr.port()).await.unwrap();
        assert_eq!(hub.local_addr(), Some(addr));
        assert!(matches!(
            hub.restart_listener(addr.port()).await,
            Err(HubError::ListenerRunning { .. })
        ));

        let (two, _two_events) = join_hub::<Relayed>(addr).await;
        assert_eq!(two.id(), id(2));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let (hub, addr, _events) = start_hub().await;
        let config = HubConfig::local();
        let taken = HubConfig {
            port: addr.port(),
            ..config
        };

        let result = Hub::listen::<String, _>(taken, RelayHandler).await;
        assert!(matches!(result, Err(HubError::BindFailed { .. })));
        drop(hub);
    }

    struct Password(&'static str);

    impl ExtraHandshake for Password {
        fn handshake<'a>(&'a self, _id: PeerId, stream: &'a mut HandshakeStream) -> HandshakeFuture<'a> {
            Box::pin(async move {
                stream.write_message(self.0).await?;
                let theirs: String = stream.read_message().await?;
                if theirs == self.0 {
                    Ok(())
                } else {
                    Err(HandshakeError::rejected("bad password"))
                }
            })
        }
    }

    #[tokio::test]
    async fn extra_handshake_failure_spends_an_id() {
        let (recorder, mut hub_events) = Recorder::new();
        let hub = Hub::listen_with_handshake::<String, _, _>(
            HubConfig::local(),
            recorder,
            Password("open sesame"),
        )
        .await
        .unwrap();
        let addr = hub.local_addr().unwrap();

        let mut wrong = HandshakeStream::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        assert!(connect_handshake(&mut wrong, &Password("guess")).await.is_err());

        let mut right = HandshakeStream::new(TcpStream::connect(addr).await.unwrap()).unwrap();
        let assigned = connect_handshake(&mut right, &Password("open sesame"))
            .await
            .unwrap();
        assert_eq!(assigned, id(2));
        assert_eq!(next_event(&mut hub_events).await, HubEvent::Connected(id(2)));
        assert_eq!(hub.peers(), vec![id(2)]);
    }
}
