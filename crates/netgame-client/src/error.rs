//! Client error types.

use std::fmt;

use netgame_protocol::ProtocolError;
use netgame_server::{HandshakeError, HubError, SendError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Connecting or the handshake failed.
    ConnectFailed {
        addr: String,
        source: HandshakeError,
    },
    /// The message cannot be encoded.
    InvalidMessage(ProtocolError),
    /// The connection is closed or closing.
    ConnectionClosed,
    /// Configuration error.
    Config(String),
    /// Hub error, from the `hub` command.
    Hub(HubError),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { addr, source } => {
                write!(f, "failed to connect to {}: {}", addr, source)
            }
            Self::InvalidMessage(err) => write!(f, "message cannot be transmitted: {}", err),
            Self::ConnectionClosed => write!(f, "connection is closed"),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Hub(err) => write!(f, "hub error: {}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectFailed { source, .. } => Some(source),
            Self::InvalidMessage(err) => Some(err),
            Self::Hub(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<SendError> for ClientError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Closed { .. } => Self::ConnectionClosed,
            SendError::InvalidMessage(e) => Self::InvalidMessage(e),
        }
    }
}

impl From<HubError> for ClientError {
    fn from(err: HubError) -> Self {
        Self::Hub(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgame_core::PeerId;

    #[test]
    fn send_error_conversion() {
        let closed = SendError::Closed {
            id: PeerId::FIRST,
        };
        assert!(matches!(ClientError::from(closed), ClientError::ConnectionClosed));
    }

    #[test]
    fn connect_failed_display() {
        let err = ClientError::ConnectFailed {
            addr: "localhost:1".into(),
            source: HandshakeError::Closed,
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to localhost:1: connection closed during handshake"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
