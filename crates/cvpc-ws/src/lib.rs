//! # cvpc-ws
//!
//! Duplex event client over a message-framed connection.
//!
//! - [`EventClient`] keeps one link open, runs a receive loop and a send loop,
//!   and fans inbound events out to [`EventCallback`]s
//! - [`Envelope`] is the MessagePack `{type, data}` wire unit; `data` is a
//!   MessagePack [`Value`], binary included
//! - [`Transport`] / [`Connector`] are the seam to the network;
//!   [`WsConnector`] is the `tokio-tungstenite` implementation with
//!   ping/pong keepalive
//! - [`testing`] provides an in-process connector for tests

#![deny(unsafe_code)]

pub mod callbacks;
pub mod client;
pub mod envelope;
pub mod error;
pub mod keepalive;
pub mod testing;
pub mod transport;
pub mod websocket;

pub use callbacks::{CallbackSet, EventCallback};
pub use client::{ClientConfig, ConnectionState, EventClient};
pub use envelope::{Envelope, UNKNOWN_EVENT_TYPE, Value, encode_event, from_value, to_value};
pub use error::{ClientError, EnvelopeError, TransportError};
pub use transport::{Connector, Frame, Transport, TransportOptions};
pub use websocket::{WsConnector, WsTransport};
