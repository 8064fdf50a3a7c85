//! Hub and connection error types.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use netgame_core::PeerId;
use netgame_protocol::ProtocolError;
use thiserror::Error;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Result type for handshake operations.
pub type HandshakeResult<T> = Result<T, HandshakeError>;

/// Errors surfaced synchronously by the hub API.
#[derive(Debug, Error)]
pub enum HubError {
    /// The listening socket could not be opened.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No connected peer has this identifier.
    #[error("unknown peer: {id}")]
    UnknownPeer { id: PeerId },

    /// The peer is known but its connection is no longer open.
    #[error("connection to peer {id} is closed")]
    ConnectionClosed { id: PeerId },

    /// The message could not be encoded.
    #[error("message cannot be transmitted: {0}")]
    InvalidMessage(#[source] ProtocolError),

    /// `restart_listener` was called while the hub is accepting.
    #[error("hub is already listening on {addr}")]
    ListenerRunning { addr: SocketAddr },

    /// The hub has been shut down.
    #[error("hub is shut down")]
    ShutDown,

    /// Socket error outside of binding.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HubError {
    /// Creates a bind failure.
    pub fn bind_failed(addr: SocketAddr, source: io::Error) -> Self {
        Self::BindFailed { addr, source }
    }
}

impl From<SendError> for HubError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Closed { id } => Self::ConnectionClosed { id },
            SendError::InvalidMessage(e) => Self::InvalidMessage(e),
        }
    }
}

/// Errors returned when queueing an item on a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is not open, or a disconnect is already queued.
    #[error("connection to peer {id} is closed")]
    Closed { id: PeerId },

    /// The message could not be encoded.
    #[error("message cannot be transmitted: {0}")]
    InvalidMessage(#[from] ProtocolError),
}

/// Errors that abort connection setup.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The client did not open with the expected greeting.
    #[error("unexpected greeting: {received}")]
    UnexpectedGreeting { received: String },

    /// The peer closed the socket before the handshake finished.
    #[error("connection closed during handshake")]
    Closed,

    /// The handshake did not finish in time.
    #[error("handshake timed out after {after:?}")]
    Timeout { after: Duration },

    /// Every identifier has been handed out.
    #[error("no identifiers left to assign")]
    IdsExhausted,

    /// The extra handshake hook refused the peer.
    #[error("handshake rejected: {0}")]
    Rejected(String),
}

impl HandshakeError {
    /// Creates a rejection from an extra handshake hook.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_maps_to_hub_error() {
        let id = PeerId::new(4).unwrap();
        let err: HubError = SendError::Closed { id }.into();
        assert!(matches!(err, HubError::ConnectionClosed { id: i } if i == id));
        assert_eq!(err.to_string(), "connection to peer 4 is closed");
    }

    #[test]
    fn handshake_error_display() {
        let err = HandshakeError::Timeout {
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "handshake timed out after 10s");
        let err = HandshakeError::Timeout {
            after: Duration::from_millis(100),
        };
        assert_eq!(err.to_string(), "handshake timed out after 100ms");
        assert_eq!(
            HandshakeError::rejected("full").to_string(),
            "handshake rejected: full"
        );
    }
}
