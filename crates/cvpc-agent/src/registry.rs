//! Event registry: maps event-type names to handlers.
//!
//! Lookups clone the handler `Arc` out of the map before awaiting it, so
//! handlers may register or unregister entries while they run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use cvpc_ws::callbacks::panic_message;
use cvpc_ws::{EventCallback, Value};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::handler::EventHandler;
use crate::handlers::{DefaultHandler, MessageHandler, PingHandler, StatusHandler, TaskHandler};

/// Registry of event handlers with a catch-all default.
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    default_handler: Arc<dyn EventHandler>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// Registry with the built-in `ping`, `message`, `task`, and `status`
    /// handlers and the logging default.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("ping", Arc::new(PingHandler));
        registry.register("message", Arc::new(MessageHandler));
        registry.register("task", Arc::new(TaskHandler));
        registry.register("status", Arc::new(StatusHandler));
        registry
    }

    /// Registry with no named handlers, only the logging default.
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_handler: Arc::new(DefaultHandler),
        }
    }

    /// Replace the fallback used for unregistered event types.
    #[must_use]
    pub fn with_default_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.default_handler = handler;
        self
    }

    /// Register `handler` for `event_type`, replacing any previous one.
    pub fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!(event_type = %event_type, "registered handler");
        let _ = self.handlers.write().insert(event_type, handler);
    }

    /// Remove the handler for `event_type`. Returns whether one was present.
    pub fn unregister(&self, event_type: &str) -> bool {
        let removed = self.handlers.write().remove(event_type).is_some();
        if removed {
            debug!(event_type, "unregistered handler");
        }
        removed
    }

    /// Whether a handler is registered for `event_type`.
    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.read().contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered handlers (the default is not counted).
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no named handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Route `data` to the handler for `event_type`, or the default.
    ///
    /// Handler errors and panics are logged and swallowed.
    pub async fn handle_event(&self, event_type: &str, data: &Value) {
        let handler = self
            .handlers
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_handler));

        match AssertUnwindSafe(handler.handle(data)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(event_type, error = %err, "error handling event");
            }
            Err(panic) => {
                error!(
                    event_type,
                    panic = panic_message(panic.as_ref()),
                    "event handler panicked"
                );
            }
        }
    }
}

#[async_trait]
impl EventCallback for EventRegistry {
    async fn on_event(&self, event_type: &str, data: &Value) -> anyhow::Result<()> {
        self.handle_event(event_type, data).await;
        Ok(())
    }
}
