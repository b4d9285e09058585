//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values,
//! and `#[serde(default)]` lets a settings file be partial.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.cvpc/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "ws": { "url": "wss://edge.example.com/agent", "pingIntervalMs": 15000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CvpcSettings {
    /// WebSocket connection settings.
    pub ws: WsSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// WebSocket connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsSettings {
    /// Peer URL (`ws://` or `wss://`). Empty means "not configured".
    pub url: String,
    /// Upper bound on establishing the connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Interval between keepalive probes in milliseconds. `0` disables probing.
    pub ping_interval_ms: u64,
    /// How long to wait for a probe reply before the connection is considered dead.
    pub ping_timeout_ms: u64,
    /// Maximum number of encoded events waiting to be sent.
    pub send_queue_capacity: usize,
    /// Pause after a failed send before the send loop continues.
    pub send_retry_delay_ms: u64,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            ping_interval_ms: 30_000,
            ping_timeout_ms: 10_000,
            send_queue_capacity: 1024,
            send_retry_delay_ms: 100,
        }
    }
}

impl WsSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keepalive probe interval, or `None` when probing is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    /// Keepalive probe timeout as a [`Duration`].
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Send-failure pause as a [`Duration`].
    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }

    /// Check that the settings describe a usable connection.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SettingsError::invalid("ws.url", "WebSocket URL is required"));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SettingsError::invalid(
                "ws.url",
                format!("WebSocket URL must use ws:// or wss://, got '{}'", self.url),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "ws.connectTimeoutMs",
                "must be greater than zero",
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "ws.sendQueueCapacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level name (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
