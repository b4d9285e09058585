//! In-process [`Connector`] for exercising the client without a network.
//!
//! Every successful [`MemoryConnector::open`] creates a connected pair: the
//! client side is a [`Transport`], the test side is a [`PeerHandle`] that can
//! push frames, close or fail the link, and inspect what the client sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::{EnvelopeError, TransportError};
use crate::transport::{Connector, Frame, Transport, TransportOptions};

enum Inbound {
    Frame(Frame),
    Close,
    Fail(TransportError),
}

#[derive(Default)]
struct PeerState {
    sent: Mutex<Vec<Vec<u8>>>,
    sent_notify: Notify,
    send_attempts: AtomicUsize,
    fail_sends: AtomicBool,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl PeerState {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

/// Test side of an in-memory link.
#[derive(Clone)]
pub struct PeerHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    state: Arc<PeerState>,
}

impl PeerHandle {
    /// Deliver a raw frame to the client.
    pub fn send_frame(&self, frame: Frame) {
        let _ = self.inbound.send(Inbound::Frame(frame));
    }

    /// Encode and deliver an envelope to the client.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), EnvelopeError> {
        self.send_frame(Frame::Binary(envelope.encode()?));
        Ok(())
    }

    /// Close the link cleanly from the peer side.
    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    /// Make the client's next read fail with `err`.
    pub fn fail(&self, err: TransportError) {
        let _ = self.inbound.send(Inbound::Fail(err));
    }

    /// Make subsequent client writes fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Payloads the client has written successfully, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.sent.lock().clone()
    }

    /// Successfully written payloads that decode as envelopes.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.state
            .sent
            .lock()
            .iter()
            .filter_map(|bytes| Envelope::decode(bytes).ok())
            .collect()
    }

    /// Wait until at least `count` payloads have been written.
    ///
    /// Returns whatever was written when the wait ends, which may be fewer
    /// than `count` if `timeout` elapsed.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.state.sent_notify.notified();
                if self.state.sent.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.sent()
    }

    /// Number of write attempts, including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    /// How many times the client called `close` on its side.
    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the client side still reports open.
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// Client side of an in-memory link.
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    state: Arc<PeerState>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&self) -> Result<Option<Frame>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        let next = tokio::select! {
            biased;
            () = self.state.closed.cancelled() => return Ok(None),
            next = inbound.recv() => next,
        };
        match next {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Close) | None => {
                self.state.closed.cancel();
                Ok(None)
            }
            Some(Inbound::Fail(err)) => {
                self.state.closed.cancel();
                Err(err)
            }
        }
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let _ = self.state.send_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.state.is_open() {
            return Err(TransportError::Closed);
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("injected send failure".into()));
        }
        self.state.sent.lock().push(payload);
        self.state.sent_notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _ = self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.cancel();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// [`Connector`] that hands out in-memory links.
#[derive(Default)]
pub struct MemoryConnector {
    peers: Mutex<Vec<PeerHandle>>,
    failures: Mutex<VecDeque<TransportError>>,
    options: Mutex<Vec<(String, TransportOptions)>>,
}

impl MemoryConnector {
    /// Create a connector with no queued failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` call fail with `err`.
    pub fn fail_next_open(&self, err: TransportError) {
        self.failures.lock().push_back(err);
    }

    /// Number of links opened successfully.
    pub fn open_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Peer of the most recently opened link.
    pub fn last_peer(&self) -> Option<PeerHandle> {
        self.peers.lock().last().cloned()
    }

    /// URL and options of every `open` call, successful or not.
    pub fn open_calls(&self) -> Vec<(String, TransportOptions)> {
        self.options.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self.options.lock().push((url.to_string(), options.clone()));
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(PeerState::default());
        self.peers.lock().push(PeerHandle {
            inbound: tx,
            state: state.clone(),
        });
        Ok(Arc::new(MemoryTransport {
            inbound: tokio::sync::Mutex::new(rx),
            state,
        }))
    }
}
