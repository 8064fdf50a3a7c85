//! Core types: peer identifiers, tracing setup

pub mod peer;
pub mod tracing;

pub use peer::{ParsePeerIdError, PeerId};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
