//! Hub side of netgame, plus the connection machinery both sides share.
//!
//! A [`Hub`] accepts TCP peers, greets them, hands out identifiers and keeps
//! every peer informed of who is connected. Application code plugs in through
//! [`HubHandler`]; [`RelayHandler`] simply echoes every message to everyone.
//!
//! # Example
//!
//! ```rust,no_run
//! use netgame_server::{Hub, HubConfig, RelayHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::listen::<serde_json::Value, _>(HubConfig::new(4000), RelayHandler).await?;
//!     println!("listening on {:?}", hub.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod handshake;
mod hub;
mod signals;

#[cfg(test)]
mod testing;

pub use config::{DEFAULT_PORT, HubConfig};
pub use connection::{
    CloseCause, Connection, ConnectionIo, ConnectionOwner, ConnectionState, EncodedFrame,
    encode_frame,
};
pub use error::{HandshakeError, HandshakeResult, HubError, HubResult, SendError};
pub use handshake::{
    ExtraHandshake, HandshakeFuture, HandshakeStream, IdAllocator, NoExtraHandshake,
    accept_handshake, connect_handshake, with_timeout,
};
pub use hub::{Hub, HubHandler, HubStatus, RelayHandler};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
