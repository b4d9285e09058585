//! In-memory capture of tracing events for tests.
//!
//! [`capture_logs`] installs a subscriber for the current thread only, so
//! tests running in parallel do not see each other's events. Tasks spawned on
//! a current-thread Tokio runtime (the `#[tokio::test]` default) run on the
//! same thread and are captured too.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Module path (or explicit `target:`) that emitted it.
    pub target: String,
    /// Rendered `message` field.
    pub message: String,
    /// Remaining fields in emission order, rendered as text.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Rendered value of field `name`, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Shared handle to everything captured so far.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    inner: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    fn count_where(&self, pred: impl Fn(&CapturedEvent) -> bool) -> usize {
        self.inner.lock().iter().filter(|e| pred(e)).count()
    }

    /// Snapshot of all events, oldest first.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.inner.lock().clone()
    }

    /// Whether any event's message contains `needle`.
    pub fn has_message(&self, needle: &str) -> bool {
        self.count_matching(needle) > 0
    }

    /// Whether any event at exactly `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.count_where(|e| e.level == level && e.message.contains(needle)) > 0
    }

    /// Number of events whose message contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.count_where(|e| e.message.contains(needle))
    }

    /// Number of events at exactly `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.count_where(|e| e.level == level)
    }

    /// Events whose target starts with `prefix`.
    pub fn events_for_target(&self, prefix: &str) -> Vec<CapturedEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.target.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[derive(Default)]
struct Collect {
    message: String,
    fields: Vec<(String, String)>,
}

impl Collect {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_owned(), value));
        }
    }
}

impl Visit for Collect {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

struct Recorder {
    logs: CapturedLogs,
}

impl<S: Subscriber> Layer<S> for Recorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collect = Collect::default();
        event.record(&mut collect);
        let meta = event.metadata();
        self.logs.inner.lock().push(CapturedEvent {
            level: *meta.level(),
            target: meta.target().to_owned(),
            message: collect.message,
            fields: collect.fields,
        });
    }
}

/// Capture every event (all levels) emitted on this thread until the guard
/// is dropped.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(Recorder { logs: logs.clone() })
        .set_default();
    (logs, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_level_and_message() {
        let (logs, _guard) = capture_logs();
        tracing::warn!("queue full");
        assert!(logs.has_event(Level::WARN, "queue full"));
        assert!(!logs.has_event(Level::ERROR, "queue full"));
    }

    #[test]
    fn records_structured_fields() {
        let (logs, _guard) = capture_logs();
        tracing::info!(event_type = "ping", bytes = 12_u64, ok = true, "event queued");

        let events = logs.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "event queued");
        assert_eq!(events[0].field("event_type"), Some("ping"));
        assert_eq!(events[0].field("bytes"), Some("12"));
        assert_eq!(events[0].field("ok"), Some("true"));
        assert_eq!(events[0].field("missing"), None);
    }

    #[test]
    fn display_fields_are_rendered_with_display() {
        let (logs, _guard) = capture_logs();
        let url = "ws://peer.test";
        tracing::info!(url = %url, "connecting");
        assert_eq!(logs.events()[0].field("url"), Some("ws://peer.test"));
    }

    #[test]
    fn trace_level_is_captured() {
        let (logs, _guard) = capture_logs();
        tracing::trace!("very chatty");
        assert_eq!(logs.count_at_level(Level::TRACE), 1);
    }

    #[test]
    fn counts_and_target_filter() {
        let (logs, _guard) = capture_logs();
        tracing::info!("info");
        tracing::error!(target: "cvpc_ws::client", "send failed");
        tracing::error!(target: "cvpc_ws::client", "send failed");

        assert_eq!(logs.count_at_level(Level::ERROR), 2);
        assert_eq!(logs.count_matching("send failed"), 2);
        assert_eq!(logs.events_for_target("cvpc_ws").len(), 2);
        assert!(logs.events_for_target("cvpc_agent").is_empty());
    }

    #[test]
    fn clear_forgets_events() {
        let (logs, _guard) = capture_logs();
        tracing::info!("before clear");
        logs.clear();
        assert!(!logs.has_message("before clear"));
        assert!(logs.events().is_empty());
    }

    #[test]
    fn capture_is_scoped_to_guard() {
        let (logs, guard) = capture_logs();
        drop(guard);
        tracing::error!("after guard");
        assert!(!logs.has_message("after guard"));
    }
}
