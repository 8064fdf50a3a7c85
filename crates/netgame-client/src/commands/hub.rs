//! Hub command: runs a relay hub in the foreground.
//!
//! Messages are relayed as untyped JSON, so any client message shape works.
//! SIGINT or SIGTERM shuts the hub down and tells every peer.

use std::sync::atomic::{AtomicU16, Ordering};

use serde_json::Value;
use tracing::{debug, info, warn};

use netgame_core::PeerId;
use netgame_server::{Hub, HubError, HubHandler, RelayHandler, SignalHandler};

use crate::config::HubSettings;
use crate::error::ClientResult;

/// Relay that pauses the listener while `max_peers` peers are connected.
#[derive(Debug)]
pub struct CapacityRelay {
    max_peers: Option<usize>,
    port: AtomicU16,
}

impl CapacityRelay {
    /// Creates a relay; `None` never pauses the listener.
    pub fn new(max_peers: Option<usize>) -> Self {
        Self {
            max_peers,
            port: AtomicU16::new(0),
        }
    }
}

impl HubHandler<Value> for CapacityRelay {
    fn message_received(&self, hub: &Hub, from: PeerId, message: Value) {
        RelayHandler.message_received(hub, from, message);
    }

    fn peer_connected(&self, hub: &Hub, id: PeerId) {
        info!(peer = %id, "peer connected");
        let Some(max) = self.max_peers else { return };

        if hub.peers().len() >= max
            && let Some(addr) = hub.local_addr()
        {
            self.port.store(addr.port(), Ordering::Relaxed);
            hub.shutdown_listener();
            info!(max_peers = max, "peer limit reached, not accepting");
        }
    }

    fn peer_disconnected(&self, hub: &Hub, id: PeerId) {
        info!(peer = %id, "peer disconnected");
        let Some(max) = self.max_peers else { return };
        if hub.peers().len() >= max || hub.local_addr().is_some() {
            return;
        }

        let port = self.port.load(Ordering::Relaxed);
        let hub = hub.clone();
        tokio::spawn(async move {
            match hub.restart_listener(port).await {
                Ok(()) => info!(port, "accepting peers again"),
                Err(e @ (HubError::ListenerRunning { .. } | HubError::ShutDown)) => {
                    debug!(error = %e, "listener not restarted");
                }
                Err(e) => warn!(error = %e, "failed to restart listener"),
            }
        });
    }
}

/// Runs a hub until a shutdown signal arrives.
pub async fn run(settings: &HubSettings) -> ClientResult<()> {
    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let relay = CapacityRelay::new(settings.max_peers);
    let hub = Hub::listen::<Value, _>(settings.hub_config(), relay).await?;
    if let Some(addr) = hub.local_addr() {
        println!("hub listening on {}", addr);
    }

    signals.shutdown().wait().await;

    let status = hub.status();
    hub.shutdown().await;
    println!(
        "hub stopped after {}s ({} peers served)",
        status.uptime_seconds, status.ids_issued
    );
    Ok(())
}
