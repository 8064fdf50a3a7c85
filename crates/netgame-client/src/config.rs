//! Configuration file.
//!
//! All settings live in a single `config.toml`, by default
//! `~/.config/netgame/config.toml`. Every key is optional; command-line
//! flags override whatever the file says.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use netgame_server::{DEFAULT_PORT, HubConfig};

use crate::client::ConnectOptions;

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Settings for `netgame chat`.
    pub client: ClientSettings,

    /// Settings for `netgame hub`.
    pub hub: HubSettings,
}

/// Where a client connects and how it presents itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Hub host.
    pub host: String,

    /// Hub port.
    pub port: u16,

    /// Connect and handshake timeout in seconds.
    pub timeout: u64,

    /// Display name attached to chat lines.
    pub name: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            timeout: 5,
            name: None,
        }
    }
}

impl ClientSettings {
    /// Builds connect options from these settings.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.host.clone(), self.port)
            .with_timeout(Duration::from_secs(self.timeout))
    }
}

/// How `netgame hub` listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Interface to bind.
    pub bind: IpAddr,

    /// Port to listen on.
    pub port: u16,

    /// Stop accepting once this many peers are connected.
    pub max_peers: Option<usize>,

    /// Handshake timeout in seconds.
    pub handshake_timeout: u64,

    /// Initial auto-reset flag for new connections.
    pub auto_reset: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_peers: None,
            handshake_timeout: 10,
            auto_reset: false,
        }
    }
}

impl HubSettings {
    /// Builds the hub configuration from these settings.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::new(self.port)
            .with_bind_addr(self.bind)
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .with_auto_reset(self.auto_reset)
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults if it is absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.client.host.trim().is_empty() {
            return Err("client.host must not be empty".to_string());
        }
        if self.client.port == 0 {
            return Err("client.port must not be 0".to_string());
        }
        if self.client.timeout == 0 {
            return Err("client.timeout must be at least 1 second".to_string());
        }
        if self.hub.handshake_timeout == 0 {
            return Err("hub.handshake_timeout must be at least 1 second".to_string());
        }
        if self.hub.max_peers == Some(0) {
            return Err("hub.max_peers must be at least 1".to_string());
        }
        Ok(())
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netgame")
    }
}
