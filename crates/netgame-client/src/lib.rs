//! Client side of netgame and the `netgame` command-line tool.
//!
//! # Example
//!
//! ```rust,no_run
//! use netgame_client::{Client, ClientHandler};
//! use netgame_core::PeerId;
//! use netgame_protocol::ForwardedMessage;
//!
//! struct Print;
//!
//! impl ClientHandler<ForwardedMessage<String>> for Print {
//!     fn on_message(&self, _client: &Client, message: ForwardedMessage<String>) {
//!         println!("{}: {}", message.from, message.message);
//!     }
//!
//!     fn on_peer_left(&self, client: &Client, id: PeerId) {
//!         println!("{id} left, {} remain", client.peers().len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect::<ForwardedMessage<String>, _>("127.0.0.1", 37829, Print).await?;
//!     client.send("hello")?;
//!     client.disconnect();
//!     client.closed().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use client::{Client, ClientHandler, ConnectOptions};
pub use error::{ClientError, ClientResult};
