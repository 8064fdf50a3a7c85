//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or moving frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame body exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: u32 },

    /// Value could not be converted to or from JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended in the middle of a frame.
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// Zero-length frame received.
    #[error("empty message")]
    EmptyMessage,
}

impl ProtocolError {
    /// Returns true if the error came from the transport rather than the data.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
