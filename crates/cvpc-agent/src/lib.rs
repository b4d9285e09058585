//! # cvpc-agent
//!
//! Routes inbound events to handlers by event type.
//!
//! [`EventRegistry`] implements [`cvpc_ws::EventCallback`], so the host wires
//! it in with `client.add_event_callback(&registry)` and every decoded event
//! is routed to the matching [`EventHandler`] or the default.

#![deny(unsafe_code)]

pub mod handler;
pub mod handlers;
pub mod registry;

pub use handler::EventHandler;
pub use handlers::{DefaultHandler, MessageHandler, PingHandler, StatusHandler, TaskHandler};
pub use registry::EventRegistry;
