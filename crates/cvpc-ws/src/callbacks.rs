//! Event callbacks and the non-owning set the client dispatches to.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::error;

use crate::envelope::Value;

/// Receives every `(type, data)` pair the client decodes.
#[async_trait]
pub trait EventCallback: Send + Sync {
    /// Handle one inbound event.
    async fn on_event(&self, event_type: &str, data: &Value) -> anyhow::Result<()>;
}

/// Set of weakly held callbacks.
///
/// Registration does not keep a callback alive: once the last `Arc` is
/// dropped elsewhere the entry disappears on the next snapshot.
#[derive(Default)]
pub struct CallbackSet {
    entries: Mutex<Vec<Weak<dyn EventCallback>>>,
}

impl CallbackSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. Returns `false` if it was already registered.
    pub fn add<C: EventCallback + 'static>(&self, callback: &Arc<C>) -> bool {
        let target = Arc::as_ptr(callback).cast::<()>();
        let mut entries = self.entries.lock();
        entries.retain(|w| w.strong_count() > 0);
        if entries.iter().any(|w| w.as_ptr().cast::<()>() == target) {
            return false;
        }
        let weak: Weak<C> = Arc::downgrade(callback);
        entries.push(weak);
        true
    }

    /// Unregister `callback`. Returns whether it was present.
    pub fn remove<C: EventCallback + 'static>(&self, callback: &Arc<C>) -> bool {
        let target = Arc::as_ptr(callback).cast::<()>();
        let mut entries = self.entries.lock();
        entries.retain(|w| w.strong_count() > 0);
        let before = entries.len();
        entries.retain(|w| w.as_ptr().cast::<()>() != target);
        entries.len() < before
    }

    /// Live callbacks, in registration order. Dead entries are pruned.
    pub fn snapshot(&self) -> Vec<Arc<dyn EventCallback>> {
        let mut entries = self.entries.lock();
        entries.retain(|w| w.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live callbacks.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether no live callback is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every live callback in turn.
    ///
    /// Each callback runs to completion before the next starts. Errors and
    /// panics are logged and do not stop delivery to the rest.
    pub async fn dispatch(&self, event_type: &str, data: &Value) {
        for callback in self.snapshot() {
            let call = AssertUnwindSafe(callback.on_event(event_type, data));
            match call.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(event_type, error = %err, "event callback failed");
                }
                Err(panic) => {
                    error!(
                        event_type,
                        panic = panic_message(panic.as_ref()),
                        "event callback panicked"
                    );
                }
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cvpc_logging::capture_logs;
    use serde_json::json;

    use super::*;
    use crate::envelope::to_value;

    fn data(value: serde_json::Value) -> Value {
        to_value(&value).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl EventCallback for Recorder {
        async fn on_event(&self, event_type: &str, data: &Value) -> anyhow::Result<()> {
            self.seen.lock().push((event_type.to_string(), data.clone()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventCallback for Failing {
        async fn on_event(&self, _event_type: &str, _data: &Value) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventCallback for Panicking {
        async fn on_event(&self, _event_type: &str, _data: &Value) -> anyhow::Result<()> {
            panic!("callback exploded")
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventCallback for Counting {
        async fn on_event(&self, _event_type: &str, _data: &Value) -> anyhow::Result<()> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn add_is_idempotent() {
        let set = CallbackSet::new();
        let cb = Arc::new(Recorder::default());
        assert!(set.add(&cb));
        assert!(!set.add(&cb));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let set = CallbackSet::new();
        let cb = Arc::new(Recorder::default());
        assert!(!set.remove(&cb));
        assert!(set.add(&cb));
        assert!(set.remove(&cb));
        assert!(set.is_empty());
        assert!(!set.remove(&cb));
    }

    #[test]
    fn dropped_callback_disappears() {
        let set = CallbackSet::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        assert!(set.add(&kept));
        assert!(set.add(&dropped));
        assert_eq!(set.len(), 2);

        drop(dropped);
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_reaches_every_callback_in_order() {
        let set = CallbackSet::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        assert!(set.add(&first));
        assert!(set.add(&second));

        set.dispatch("message", &data(json!({"text": "hi"}))).await;

        assert_eq!(
            first.seen.lock().as_slice(),
            &[("message".to_string(), data(json!({"text": "hi"})))]
        );
        assert_eq!(second.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_dispatch() {
        let (logs, _guard) = capture_logs();
        let set = CallbackSet::new();
        let failing = Arc::new(Failing);
        let panicking = Arc::new(Panicking);
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(set.add(&failing));
        assert!(set.add(&panicking));
        assert!(set.add(&counter));

        set.dispatch("task", &Value::Nil).await;
        set.dispatch("task", &Value::Nil).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert!(logs.has_message("event callback failed"));
        assert!(logs.has_message("event callback panicked"));
    }

    #[tokio::test]
    async fn distinct_callback_types_share_one_set() {
        let set = CallbackSet::new();
        let recorder = Arc::new(Recorder::default());
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(set.add(&recorder));
        assert!(set.add(&counter));
        assert_eq!(set.len(), 2);

        set.dispatch("frame", &Value::Binary(vec![1, 2])).await;

        assert_eq!(
            recorder.seen.lock().as_slice(),
            &[("frame".to_string(), Value::Binary(vec![1, 2]))]
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(set.remove(&counter));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
