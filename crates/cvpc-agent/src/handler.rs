//! Event handler trait.
//!
//! Handlers are registered with the
//! [`EventRegistry`](crate::registry::EventRegistry) under an event-type name
//! and invoked with the event's `data` payload.

use async_trait::async_trait;
use cvpc_ws::Value;

/// Handles the payload of one event type.
///
/// Errors and panics are caught by the registry and logged; they never
/// reach the connection client.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event payload.
    async fn handle(&self, data: &Value) -> anyhow::Result<()>;
}
