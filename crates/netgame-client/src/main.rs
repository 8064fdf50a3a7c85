//! netgame CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use netgame_client::cli::{Cli, Command, ConfigAction};
use netgame_client::commands;
use netgame_client::config::ClientConfig;
use netgame_client::error::{ClientError, ClientResult};
use netgame_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = match (&cli.command, cli.debug) {
        (_, true) => TracingConfig::cli_debug(),
        (Command::Hub { .. }, false) => TracingConfig::hub(),
        _ => TracingConfig::quiet(),
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path).map_err(ClientError::Config)?,
        None => ClientConfig::load().map_err(ClientError::Config)?,
    };

    match cli.command {
        Command::Hub {
            port,
            bind,
            max_peers,
        } => {
            if let Some(port) = port {
                config.hub.port = port;
            }
            if let Some(bind) = bind {
                config.hub.bind = bind;
            }
            if max_peers.is_some() {
                config.hub.max_peers = max_peers;
            }
            config.validate().map_err(ClientError::Config)?;
            commands::hub::run(&config.hub).await
        }
        Command::Chat { host, port, name } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = port {
                config.client.port = port;
            }
            if name.is_some() {
                config.client.name = name;
            }
            config.validate().map_err(ClientError::Config)?;

            let options = config.client.connect_options();
            commands::chat::run(options, config.client.name).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
