//! Per-socket connection shared by the hub and client sides.
//!
//! A [`Connection`] owns one TCP socket split between two tasks: the sender
//! drains an unbounded FIFO of pre-encoded frames, the receiver decodes
//! incoming [`Frame`]s and hands them to a [`ConnectionOwner`]. State moves
//! `Connecting -> Open -> Closing -> Closed`; whichever path wins the move out
//! of `Open` records the [`CloseCause`], and the owner hears about it exactly
//! once, after both tasks have stopped.
//!
//! JSON frames carry no object-identity cache, so reset markers and the
//! auto-reset flag do not change the bytes on the wire. They are kept so
//! callers written against a caching serializer behave the same.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use netgame_core::PeerId;
use netgame_protocol::{
    Frame, FrameReader, FrameWriter, ProtocolError, StatusUpdate, encode_message,
};

use crate::error::SendError;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Handshake done, tasks not started yet.
    Connecting,
    /// Both tasks running; items may be queued.
    Open,
    /// Close requested; tasks are winding down.
    Closing,
    /// Both tasks exited and the socket is released.
    Closed,
}

/// Why a connection left the `Open` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Closed on this side, or after flushing our own disconnect marker.
    Local,
    /// The peer sent a disconnect marker.
    Remote { reason: Option<String> },
    /// Transport or decode failure.
    Error(String),
}

/// Receives everything a connection's tasks observe.
///
/// Methods run on the connection's own tasks and must not block.
pub trait ConnectionOwner<M>: Send + Sync + 'static {
    /// The connection became `Open`; runs before either task starts.
    fn connection_opened(&self, _conn: &Connection) {}

    /// An application message arrived.
    fn message_received(&self, conn: &Connection, message: M);

    /// A roster status update arrived.
    fn status_received(&self, conn: &Connection, status: StatusUpdate) {
        warn!(peer = %conn.id(), roster = ?status.roster, "ignoring unexpected status update");
    }

    /// Both tasks have stopped. Called exactly once.
    fn connection_closed(&self, conn: &Connection, cause: CloseCause);
}

/// Encoded frame ready to be written to any number of connections.
pub type EncodedFrame = Arc<[u8]>;

/// Encodes an application message once, for queueing on several connections.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<EncodedFrame, ProtocolError> {
    encode_message(&Frame::Message(message)).map(Arc::from)
}

enum Outgoing {
    Frame(EncodedFrame),
    Reset,
    Disconnect(EncodedFrame),
}

struct Inner {
    id: PeerId,
    peer_addr: SocketAddr,
    state: watch::Sender<ConnectionState>,
    cause: Mutex<Option<CloseCause>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    disconnect_queued: AtomicBool,
    auto_reset: AtomicBool,
    live_tasks: AtomicUsize,
}

/// Cheaply clonable handle to one peer connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Socket halves and queue of a connection whose tasks have not started.
pub struct ConnectionIo {
    conn: Connection,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<Outgoing>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Wraps a socket that has completed its handshake.
    ///
    /// The connection stays `Connecting` until [`ConnectionIo::start`].
    pub fn new(id: PeerId, stream: TcpStream, peer_addr: SocketAddr) -> (Self, ConnectionIo) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %id, error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let conn = Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                state,
                cause: Mutex::new(None),
                outgoing,
                disconnect_queued: AtomicBool::new(false),
                auto_reset: AtomicBool::new(false),
                live_tasks: AtomicUsize::new(0),
            }),
        };

        let io = ConnectionIo {
            conn: conn.clone(),
            reader,
            writer,
            queue,
        };
        (conn, io)
    }

    /// Returns the peer identifier.
    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    /// Returns the remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns true while items can be queued.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.inner.disconnect_queued.load(Ordering::Acquire)
    }

    /// Returns the auto-reset flag.
    pub fn auto_reset(&self) -> bool {
        self.inner.auto_reset.load(Ordering::Relaxed)
    }

    /// Sets the auto-reset flag.
    pub fn set_auto_reset(&self, auto_reset: bool) {
        self.inner.auto_reset.store(auto_reset, Ordering::Relaxed);
    }

    /// Encodes and queues an application message. Never blocks.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), SendError> {
        let frame = encode_frame(message)?;
        self.send_encoded(frame)
    }

    /// Queues a frame produced by [`encode_frame`].
    pub fn send_encoded(&self, frame: EncodedFrame) -> Result<(), SendError> {
        self.enqueue(Outgoing::Frame(frame))
    }

    /// Queues a reset marker.
    pub fn reset_output(&self) -> Result<(), SendError> {
        self.enqueue(Outgoing::Reset)
    }

    /// Queues a disconnect marker; the connection closes once it is flushed.
    ///
    /// Anything queued after this fails with [`SendError::Closed`].
    pub fn disconnect(&self, reason: Option<&str>) -> Result<(), SendError> {
        let frame: Frame<()> = Frame::Disconnect {
            reason: reason.map(str::to_string),
        };
        let bytes = encode_message(&frame)?;

        let closed = SendError::Closed { id: self.id() };
        if self.state() != ConnectionState::Open
            || self.inner.disconnect_queued.swap(true, Ordering::AcqRel)
        {
            return Err(closed);
        }
        self.inner
            .outgoing
            .send(Outgoing::Disconnect(Arc::from(bytes)))
            .map_err(|_| closed)
    }

    /// Closes the connection without sending anything. Idempotent.
    pub fn close(&self) {
        if self.begin_close(CloseCause::Local) {
            debug!(peer = %self.id(), "connection closed locally");
        }
    }

    /// Waits until both tasks have exited.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    fn enqueue(&self, item: Outgoing) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed { id: self.id() });
        }
        self.inner
            .outgoing
            .send(item)
            .map_err(|_| SendError::Closed { id: self.id() })
    }

    /// Moves out of `Connecting`/`Open`, recording the cause. Returns false
    /// if another path already did.
    fn begin_close(&self, cause: CloseCause) -> bool {
        let mut cause = Some(cause);
        self.inner.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                *self
                    .inner
                    .cause
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = cause.take();
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        })
    }

    /// Error-close path: records the failure unless already closing.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.begin_close(CloseCause::Error(reason.clone())) {
            warn!(peer = %self.id(), reason = %reason, "connection failed");
        }
    }

    fn task_exited<M: 'static>(&self, owner: &dyn ConnectionOwner<M>) {
        if self.inner.live_tasks.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let cause = self
            .inner
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(CloseCause::Local);
        debug!(peer = %self.id(), ?cause, "connection tasks stopped");

        owner.connection_closed(self, cause);
        self.inner.state.send_replace(ConnectionState::Closed);
    }
}

impl ConnectionIo {
    /// Returns the connection these halves belong to.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Opens the connection and starts its sender and receiver tasks.
    ///
    /// [`ConnectionOwner::connection_opened`] runs before either task, so
    /// anything it queues goes out before later traffic.
    pub fn start<M>(self, owner: Arc<dyn ConnectionOwner<M>>)
    where
        M: DeserializeOwned + Send + 'static,
    {
        let Self {
            conn,
            reader,
            writer,
            queue,
        } = self;

        let opened = conn.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });
        if opened {
            debug!(peer = %conn.id(), addr = %conn.peer_addr(), "connection open");
            owner.connection_opened(&conn);
        }

        conn.inner.live_tasks.store(2, Ordering::Release);
        tokio::spawn(run_sender(
            conn.clone(),
            FrameWriter::new(writer),
            queue,
            owner.clone(),
        ));
        tokio::spawn(run_receiver(conn, FrameReader::new(reader), owner));
    }
}

async fn closing(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|state| *state >= ConnectionState::Closing).await;
}

async fn run_sender<M: 'static>(
    conn: Connection,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    owner: Arc<dyn ConnectionOwner<M>>,
) {
    let mut state_rx = conn.inner.state.subscribe();

    loop {
        let item = tokio::select! {
            _ = closing(&mut state_rx) => break,
            item = queue.recv() => item,
        };
        let Some(item) = item else { break };

        let (frame, is_disconnect) = match item {
            Outgoing::Reset => {
                trace!(peer = %conn.id(), "reset marker: no serialization cache to clear");
                continue;
            }
            Outgoing::Frame(frame) => (frame, false),
            Outgoing::Disconnect(frame) => (frame, true),
        };

        if conn.auto_reset() {
            trace!(peer = %conn.id(), "auto reset before send");
        }

        let written = tokio::select! {
            _ = closing(&mut state_rx) => break,
            result = write_and_flush(&mut writer, &frame) => result,
        };
        if let Err(e) = written {
            conn.fail(format!("send failed: {e}"));
            break;
        }

        if is_disconnect {
            debug!(peer = %conn.id(), "disconnect marker flushed");
            conn.close();
            break;
        }
    }

    drop(writer);
    conn.task_exited(owner.as_ref());
}

async fn write_and_flush(
    writer: &mut FrameWriter<OwnedWriteHalf>,
    frame: &[u8],
) -> Result<(), ProtocolError> {
    writer.write_frame(frame).await?;
    writer.flush().await
}

async fn run_receiver<M>(
    conn: Connection,
    mut reader: FrameReader<OwnedReadHalf>,
    owner: Arc<dyn ConnectionOwner<M>>,
) where
    M: DeserializeOwned + 'static,
{
    let mut state_rx = conn.inner.state.subscribe();

    loop {
        let result = tokio::select! {
            _ = closing(&mut state_rx) => break,
            result = reader.read_message::<Frame<M>>() => result,
        };

        match result {
            Ok(Some(Frame::Message(message))) => owner.message_received(&conn, message),
            Ok(Some(Frame::Status(status))) => owner.status_received(&conn, status),
            Ok(Some(Frame::Disconnect { reason })) => {
                debug!(peer = %conn.id(), reason = ?reason, "peer sent disconnect");
                conn.begin_close(CloseCause::Remote { reason });
                break;
            }
            Ok(None) => {
                conn.fail("connection closed unexpectedly");
                break;
            }
            Err(e) if e.is_io() => {
                conn.fail(format!("receive failed: {e}"));
                break;
            }
            Err(e) => {
                conn.fail(format!("malformed frame: {e}"));
                break;
            }
        }
    }

    drop(reader);
    conn.task_exited(owner.as_ref());
}
