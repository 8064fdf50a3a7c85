//! Frames exchanged after the handshake.

use netgame_core::PeerId;
use serde::{Deserialize, Serialize};

/// One item on the wire once a session is open.
///
/// Application payloads are opaque to the protocol; the other variants are
/// consumed by the connection layer itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame<M> {
    /// Application-defined message.
    Message(M),

    /// Roster snapshot sent by the hub after a join or leave.
    Status(StatusUpdate),

    /// The sender is ending the session.
    Disconnect {
        /// Human-readable reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl<M> Frame<M> {
    /// Creates a disconnect marker with a reason.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: Some(reason.into()),
        }
    }

    /// Returns the frame kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Status(_) => "status",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// Whether a status update reports a join or a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterChange {
    /// A peer completed its handshake.
    Joined,
    /// A peer's connection closed.
    Left,
}

/// Roster snapshot broadcast by the hub whenever its roster changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Peer whose arrival or departure triggered the update.
    pub peer: PeerId,
    /// Join or leave.
    pub change: RosterChange,
    /// Every peer connected after the change, sorted.
    pub roster: Vec<PeerId>,
}

impl StatusUpdate {
    /// Creates a status update.
    pub fn new(peer: PeerId, change: RosterChange, roster: Vec<PeerId>) -> Self {
        Self {
            peer,
            change,
            roster,
        }
    }

    /// Returns true for a join.
    pub fn is_join(&self) -> bool {
        self.change == RosterChange::Joined
    }
}

/// Message relayed by the hub on behalf of one of its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedMessage<M> {
    /// Peer that originally sent the message.
    pub from: PeerId,
    /// The original message.
    pub message: M,
}

impl<M> ForwardedMessage<M> {
    /// Wraps a message with its sender.
    pub fn new(from: PeerId, message: M) -> Self {
        Self { from, message }
    }
}
