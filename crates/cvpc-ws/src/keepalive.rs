//! Ping/pong liveness probing for an open link.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// A probe went unanswered within the timeout window.
    TimedOut,
    /// The loop was cancelled externally.
    Cancelled,
    /// Writing the probe itself failed.
    PingFailed,
}

/// Shared liveness state of one link.
///
/// The reader records pongs here; the keepalive loop watches them and marks
/// the link dead when a probe goes unanswered.
#[derive(Debug)]
pub struct LinkHealth {
    open: AtomicBool,
    pongs: AtomicU64,
    pong: Notify,
    dead: CancellationToken,
    failure: Mutex<Option<TransportError>>,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHealth {
    /// State for a freshly opened link.
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            pongs: AtomicU64::new(0),
            pong: Notify::new(),
            dead: CancellationToken::new(),
            failure: Mutex::new(None),
        }
    }

    /// Whether the link is still usable.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the link closed without recording a failure.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Mark the link failed. The first recorded failure wins.
    pub fn mark_dead(&self, err: TransportError) {
        self.mark_closed();
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(err);
            }
        }
        self.dead.cancel();
    }

    /// Failure recorded by [`mark_dead`](Self::mark_dead), if any.
    pub fn failure(&self) -> Option<TransportError> {
        self.failure.lock().clone()
    }

    /// Resolves once the link has been marked dead.
    pub async fn died(&self) {
        self.dead.cancelled().await;
    }

    /// Record an inbound pong.
    pub fn record_pong(&self) {
        let _ = self.pongs.fetch_add(1, Ordering::AcqRel);
        self.pong.notify_one();
    }

    /// Number of pongs seen so far.
    pub fn pong_count(&self) -> u64 {
        self.pongs.load(Ordering::Acquire)
    }
}

/// Probe the link every `interval` until cancelled or the link fails.
///
/// After each probe is written, a pong must arrive within `timeout`. If it
/// does not, the link is marked dead with
/// [`TransportError::KeepaliveTimeout`] and [`KeepaliveResult::TimedOut`] is
/// returned.
pub async fn run_keepalive<F, Fut>(
    health: Arc<LinkHealth>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
    mut send_ping: F,
) -> KeepaliveResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
            _ = ticker.tick() => {}
        }

        let seen = health.pong_count();
        if let Err(err) = send_ping().await {
            debug!(error = %err, "keepalive probe failed to send");
            health.mark_dead(err);
            return KeepaliveResult::PingFailed;
        }

        let deadline = Instant::now() + timeout;
        while health.pong_count() == seen {
            tokio::select! {
                () = cancel.cancelled() => return KeepaliveResult::Cancelled,
                () = health.pong.notified() => {}
                () = time::sleep_until(deadline) => {
                    if health.pong_count() != seen {
                        break;
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(timeout_ms, "keepalive probe unanswered, marking link dead");
                    health.mark_dead(TransportError::KeepaliveTimeout { timeout_ms });
                    return KeepaliveResult::TimedOut;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_ping(count: Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<Result<(), TransportError>> {
        move || {
            let _ = count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[test]
    fn fresh_link_is_open() {
        let health = LinkHealth::new();
        assert!(health.is_open());
        assert_eq!(health.failure(), None);
        assert_eq!(health.pong_count(), 0);
    }

    #[test]
    fn first_failure_wins() {
        let health = LinkHealth::new();
        health.mark_dead(TransportError::KeepaliveTimeout { timeout_ms: 5 });
        health.mark_dead(TransportError::Closed);
        assert!(!health.is_open());
        assert_eq!(
            health.failure(),
            Some(TransportError::KeepaliveTimeout { timeout_ms: 5 })
        );
    }

    #[test]
    fn mark_closed_records_no_failure() {
        let health = LinkHealth::new();
        health.mark_closed();
        assert!(!health.is_open());
        assert_eq!(health.failure(), None);
    }

    #[tokio::test]
    async fn cancelled_before_first_probe() {
        let health = Arc::new(LinkHealth::new());
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_keepalive(
            health.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            cancel,
            counting_ping(count.clone()),
        )
        .await;

        assert_eq!(result, KeepaliveResult::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(health.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probe_times_out() {
        let health = Arc::new(LinkHealth::new());
        let count = Arc::new(AtomicUsize::new(0));

        let result = run_keepalive(
            health.clone(),
            Duration::from_millis(100),
            Duration::from_millis(50),
            CancellationToken::new(),
            counting_ping(count.clone()),
        )
        .await;

        assert_eq!(result, KeepaliveResult::TimedOut);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!health.is_open());
        assert_eq!(
            health.failure(),
            Some(TransportError::KeepaliveTimeout { timeout_ms: 50 })
        );
        // The dead signal has fired.
        health.died().await;
    }

    #[tokio::test(start_paused = true)]
    async fn answered_probes_keep_link_alive() {
        let health = Arc::new(LinkHealth::new());
        let cancel = CancellationToken::new();
        let probes = Arc::new(AtomicUsize::new(0));

        let responder = health.clone();
        let counter = probes.clone();
        let handle = tokio::spawn(run_keepalive(
            health.clone(),
            Duration::from_millis(100),
            Duration::from_millis(50),
            cancel.clone(),
            move || {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                responder.record_pong();
                futures::future::ready(Ok(()))
            },
        ));

        time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
        assert!(probes.load(Ordering::SeqCst) >= 5);
        assert!(health.is_open());
        assert_eq!(health.failure(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_send_failure_marks_link_dead() {
        let health = Arc::new(LinkHealth::new());

        let result = run_keepalive(
            health.clone(),
            Duration::from_millis(10),
            Duration::from_millis(10),
            CancellationToken::new(),
            || futures::future::ready(Err(TransportError::Send("broken pipe".into()))),
        )
        .await;

        assert_eq!(result, KeepaliveResult::PingFailed);
        assert_eq!(
            health.failure(),
            Some(TransportError::Send("broken pipe".into()))
        );
    }

    #[test]
    fn keepalive_result_equality() {
        assert_eq!(KeepaliveResult::TimedOut, KeepaliveResult::TimedOut);
        assert_ne!(KeepaliveResult::TimedOut, KeepaliveResult::Cancelled);
        assert_ne!(KeepaliveResult::Cancelled, KeepaliveResult::PingFailed);
    }
}
