//! # cvpc
//!
//! Agent binary: loads settings, initializes logging, connects the event
//! client, and routes inbound events through the registry until the link
//! drops or the process is interrupted.

#![deny(unsafe_code)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cvpc_agent::EventRegistry;
use cvpc_settings::{CvpcSettings, WsSettings};
use cvpc_ws::{ClientConfig, ConnectionState, EventClient};
use tracing::{info, warn};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(&cli)?;
    cvpc_logging::init_subscriber(cli.log_level(&settings.logging.level));

    match &cli.command {
        Command::Agent(args) => {
            args.apply(&mut settings.ws);
            run_agent(&settings.ws).await
        }
    }
}

fn load_settings(cli: &Cli) -> Result<CvpcSettings> {
    match &cli.settings {
        Some(path) => cvpc_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => cvpc_settings::load_settings().context("failed to load settings"),
    }
}

fn client_config(ws: &WsSettings) -> ClientConfig {
    ClientConfig {
        url: ws.url.clone(),
        connect_timeout: ws.connect_timeout(),
        ping_interval: ws.ping_interval(),
        ping_timeout: ws.ping_timeout(),
        send_queue_capacity: ws.send_queue_capacity,
        send_retry_delay: ws.send_retry_delay(),
    }
}

async fn run_agent(ws: &WsSettings) -> Result<()> {
    ws.validate().context("invalid websocket settings")?;

    let client = EventClient::new(client_config(ws));
    let registry = Arc::new(EventRegistry::new());
    let _ = client.add_event_callback(&registry);

    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", ws.url))?;
    info!(url = %ws.url, "agent connected");

    let mut state = client.subscribe_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
            info!("shutting down agent");
        }
        _ = state.wait_for(|s| *s == ConnectionState::Disconnected) => {
            warn!(url = %ws.url, "connection lost");
        }
    }

    if client.is_connected() {
        client.disconnect().await;
    }
    info!("agent disconnected");
    Ok(())
}
