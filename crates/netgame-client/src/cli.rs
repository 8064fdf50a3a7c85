//! Command-line interface definition.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// netgame - relay messages between peers through a hub
#[derive(Debug, Parser)]
#[command(name = "netgame")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "NETGAME_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a relay hub in the foreground
    Hub {
        /// Port to listen on
        #[arg(long, short)]
        port: Option<u16>,

        /// Interface to bind
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Stop accepting new peers while this many are connected
        #[arg(long)]
        max_peers: Option<usize>,
    },

    /// Chat with other peers through a hub
    Chat {
        /// Hub host
        #[arg(long)]
        host: Option<String>,

        /// Hub port
        #[arg(long, short)]
        port: Option<u16>,

        /// Name shown to other peers
        #[arg(long, short)]
        name: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
