//! Hub configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 37829;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to listen on.
    pub bind_addr: IpAddr,

    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,

    /// Upper bound on the greeting, id reply and extra handshake.
    pub handshake_timeout: Duration,

    /// How long `shutdown` waits for peers to drain before force-closing.
    pub shutdown_grace: Duration,

    /// Initial auto-reset flag for new connections.
    pub auto_reset: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            auto_reset: false,
        }
    }
}

impl HubConfig {
    /// Creates a configuration listening on all interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Loopback-only configuration on an ephemeral port.
    pub fn local() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Default::default()
        }
    }

    /// Builder: set bind address.
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Builder: set handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Builder: set shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Builder: set auto reset.
    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    /// Returns the socket address for a given port on the configured interface.
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_addr, port)
    }
}
