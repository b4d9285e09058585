//! Transport seam between the client and the network.
//!
//! The client only needs a duplex, message-framed connection: open it, read
//! frames, write binary payloads, close it, and ask whether it is still open.
//! [`WsConnector`](crate::websocket::WsConnector) implements this over
//! `tokio-tungstenite`; [`MemoryConnector`](crate::testing::MemoryConnector)
//! implements it in-process for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// A data frame read from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Binary payload (carries an encoded envelope).
    Binary(Vec<u8>),
    /// Text payload (not part of the protocol; logged and skipped).
    Text(String),
}

/// Connection parameters handed to a [`Connector`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Interval between keepalive probes. `None` disables probing.
    pub ping_interval: Option<Duration>,
    /// How long a probe may go unanswered before the link is declared dead.
    pub ping_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// An open duplex connection.
///
/// `receive` and `send` may be called concurrently from different tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for the next data frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection cleanly.
    /// Liveness failures detected by the transport itself surface here as
    /// errors.
    async fn receive(&self) -> Result<Option<Frame>, TransportError>;

    /// Write one binary frame.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is harmless.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// Opens [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `url`.
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
