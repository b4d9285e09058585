//! Error types for the transport, the envelope codec, and the client.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport) or while opening one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established within the connect timeout.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The connection could not be established.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Target address.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// A keepalive probe went unanswered.
    #[error("keepalive probe unanswered after {timeout_ms}ms")]
    KeepaliveTimeout {
        /// Probe timeout that elapsed.
        timeout_ms: u64,
    },

    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// Protocol-level or I/O failure on an open connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
}

/// Errors from encoding or decoding an [`Envelope`](crate::envelope::Envelope).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// MessagePack encoding failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmpv::encode::Error),

    /// The payload is not valid MessagePack.
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmpv::decode::Error),

    /// A complete value was decoded but bytes were left over.
    #[error("failed to decode envelope: {len} trailing bytes")]
    TrailingBytes {
        /// Number of unread bytes.
        len: usize,
    },

    /// Converting between event data and a Rust type failed.
    #[error("event data conversion failed: {0}")]
    Convert(#[from] rmpv::ext::Error),

    /// The payload decoded, but is not a map.
    #[error("invalid message format: expected map, got {kind}")]
    NotAMap {
        /// Kind of value that was received instead.
        kind: &'static str,
    },

    /// The `type` field is present but is not a string.
    #[error("invalid message format: `type` must be a string, got {kind}")]
    InvalidType {
        /// Kind of value found in the `type` field.
        kind: &'static str,
    },
}

/// Errors surfaced by the [`EventClient`](crate::client::EventClient) public API.
///
/// Only transport establishment failures cross the client boundary; every
/// runtime failure is absorbed by the background loops and logged.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Opening the transport failed. Cleanup has already run.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
