//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use cvpc_settings::{WsSettings, secs_to_millis};

/// Event agent over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "cvpc", version, about = "Event agent over WebSocket")]
pub struct Cli {
    /// Logging severity (overrides settings).
    #[arg(long, global = true, value_name = "LEVEL", value_parser = parse_severity)]
    pub severity: Option<String>,

    /// Enable debugging mode; logging severity becomes at least `debug`.
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Be more verbose (repeatable).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Same as `-d -vv`.
    #[arg(short = 'D', global = true)]
    pub developer: bool,

    /// Settings file (default: `~/.cvpc/settings.json`).
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Run modes.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the peer and handle events until disconnected.
    Agent(AgentArgs),
}

/// Connection flags for the `agent` command. Timeouts are in seconds.
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct AgentArgs {
    /// Peer address (`ws://` or `wss://`).
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,

    /// Connect timeout in seconds.
    #[arg(long, value_name = "SEC", value_parser = parse_secs)]
    pub ws_connect_timeout: Option<u64>,

    /// Keepalive probe interval in seconds (0 disables probing).
    #[arg(long, value_name = "SEC", value_parser = parse_secs)]
    pub ws_ping_interval: Option<u64>,

    /// Keepalive probe timeout in seconds.
    #[arg(long, value_name = "SEC", value_parser = parse_secs)]
    pub ws_ping_timeout: Option<u64>,
}

impl Cli {
    /// Level to initialize logging with, given the configured one.
    pub fn log_level(&self, configured: &str) -> &'static str {
        let base = self.severity.as_deref().unwrap_or(configured);
        let debug = self.debug || self.developer;
        let verbose = if self.developer {
            self.verbose.saturating_add(2)
        } else {
            self.verbose
        };
        cvpc_logging::effective_level(base, debug, verbose)
    }
}

impl AgentArgs {
    /// Apply the flags that were given over `ws`.
    pub fn apply(&self, ws: &mut WsSettings) {
        if let Some(url) = &self.ws_url {
            ws.url.clone_from(url);
        }
        if let Some(ms) = self.ws_connect_timeout {
            ws.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.ws_ping_interval {
            ws.ping_interval_ms = ms;
        }
        if let Some(ms) = self.ws_ping_timeout {
            ws.ping_timeout_ms = ms;
        }
    }
}

/// Parse fractional seconds into milliseconds.
fn parse_secs(value: &str) -> Result<u64, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    secs_to_millis(secs).ok_or_else(|| format!("'{value}' is out of range"))
}

fn parse_severity(value: &str) -> Result<String, String> {
    cvpc_logging::normalize_level(value)
        .map(str::to_string)
        .ok_or_else(|| {
            format!("unknown severity '{value}' (expected error, warn, info, debug, or trace)")
        })
}
