//! Built-in handlers. Each one only logs the event.

use async_trait::async_trait;
use cvpc_ws::Value;
use tracing::{debug, info, warn};

use crate::handler::EventHandler;

/// `ping`: debug log.
#[derive(Clone, Copy, Debug, Default)]
pub struct PingHandler;

#[async_trait]
impl EventHandler for PingHandler {
    async fn handle(&self, _data: &Value) -> anyhow::Result<()> {
        debug!("received ping event");
        Ok(())
    }
}

/// `message`: info log with the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageHandler;

#[async_trait]
impl EventHandler for MessageHandler {
    async fn handle(&self, data: &Value) -> anyhow::Result<()> {
        info!(%data, "received message");
        Ok(())
    }
}

/// `task`: info log with the payload. Tasks are not executed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskHandler;

#[async_trait]
impl EventHandler for TaskHandler {
    async fn handle(&self, data: &Value) -> anyhow::Result<()> {
        info!(%data, "received task event");
        Ok(())
    }
}

/// `status`: info log with the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusHandler;

#[async_trait]
impl EventHandler for StatusHandler {
    async fn handle(&self, data: &Value) -> anyhow::Result<()> {
        info!(%data, "status update");
        Ok(())
    }
}

/// Fallback for unregistered event types: warning with the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHandler;

#[async_trait]
impl EventHandler for DefaultHandler {
    async fn handle(&self, data: &Value) -> anyhow::Result<()> {
        warn!(%data, "unknown event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cvpc_logging::capture_logs;
    use serde_json::json;
    use tracing::Level;

    use super::*;

    fn data(value: serde_json::Value) -> Value {
        cvpc_ws::to_value(&value).unwrap()
    }

    #[tokio::test]
    async fn ping_logs_at_debug() {
        let (logs, _guard) = capture_logs();
        PingHandler.handle(&data(json!({}))).await.unwrap();
        assert!(logs.has_event(Level::DEBUG, "received ping event"));
    }

    #[tokio::test]
    async fn message_logs_payload_at_info() {
        let (logs, _guard) = capture_logs();
        MessageHandler.handle(&data(json!({"text": "hi"}))).await.unwrap();

        let events = logs.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::INFO);
        assert_eq!(events[0].message, "received message");
        let logged = events[0].field("data").unwrap();
        assert!(logged.contains("text"));
        assert!(logged.contains("hi"));
    }

    #[tokio::test]
    async fn task_and_status_log_at_info() {
        let (logs, _guard) = capture_logs();
        TaskHandler.handle(&data(json!({"id": 3}))).await.unwrap();
        StatusHandler.handle(&data(json!("ok"))).await.unwrap();
        assert!(logs.has_event(Level::INFO, "received task event"));
        assert!(logs.has_event(Level::INFO, "status update"));
    }

    #[tokio::test]
    async fn default_warns() {
        let (logs, _guard) = capture_logs();
        DefaultHandler.handle(&Value::Nil).await.unwrap();
        assert!(logs.has_event(Level::WARN, "unknown event"));
    }
}
