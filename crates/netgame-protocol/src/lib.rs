//! Wire protocol shared by the netgame hub and its clients.
//!
//! # Framing
//!
//! Every item is sent as length-prefixed JSON:
//! - 4 bytes: body length (u32, big-endian)
//! - N bytes: JSON body
//!
//! # Handshake
//!
//! 1. The client sends [`GREETING`] as a JSON string.
//! 2. The hub answers with the client's [`PeerId`](netgame_core::PeerId) as a
//!    JSON number, or closes the socket if the greeting did not match.
//! 3. Both sides may exchange extra application frames before the session
//!    starts.
//!
//! # Session
//!
//! After the handshake every item is a [`Frame`]: an application message, a
//! roster [`StatusUpdate`], or a disconnect marker.
//!
//! ```rust
//! use netgame_protocol::{Frame, encode_message, decode_message};
//!
//! let bytes = encode_message(&Frame::Message("hello")).unwrap();
//! let decoded: Frame<String> = decode_message(&bytes).unwrap();
//! assert_eq!(decoded, Frame::Message("hello".to_string()));
//! ```

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, decode_message, encode_message};
pub use types::{ForwardedMessage, Frame, RosterChange, StatusUpdate};

/// Literal the client sends to open a session.
pub const GREETING: &str = "Hello Hub";

/// Disconnect reason the hub uses when it is shutting down normally.
pub const SHUTDOWN_REASON: &str = "*shutdown*";

/// Disconnect reason a client sends when it leaves.
pub const GOODBYE_REASON: &str = "Goodbye Hub";

/// Maximum body size of a single frame (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;
