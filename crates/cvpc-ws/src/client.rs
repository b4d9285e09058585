//! Long-lived event client.
//!
//! [`EventClient`] owns one link at a time. While connected it runs exactly
//! one receive loop (decode inbound frames, dispatch to callbacks) and one
//! send loop (drain the outbound queue onto the transport). Host-initiated
//! disconnects and transport failures both end in the same cleanup routine,
//! serialized by the lifecycle mutex.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callbacks::{CallbackSet, EventCallback};
use crate::envelope::{Envelope, Value, encode_event};
use crate::error::{ClientError, EnvelopeError};
use crate::transport::{Connector, Frame, Transport, TransportOptions};
use crate::websocket::WsConnector;

tokio::task_local! {
    /// Session of the receive loop the current task belongs to.
    static RECEIVE_SESSION: u64;
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Peer address (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on opening the transport.
    pub connect_timeout: Duration,
    /// Keepalive probe interval; `None` disables probing.
    pub ping_interval: Option<Duration>,
    /// How long a probe may go unanswered.
    pub ping_timeout: Duration,
    /// Outbound queue capacity. A full queue drops new messages.
    pub send_queue_capacity: usize,
    /// Pause after a failed write before the send loop resumes.
    pub send_retry_delay: Duration,
}

impl ClientConfig {
    /// Defaults for `url`: 10s connect, 30s/10s keepalive, 1024 queue, 100ms retry.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(10),
            send_queue_capacity: 1024,
            send_retry_delay: Duration::from_millis(100),
        }
    }

    /// Options handed to the connector.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
        }
    }
}

/// Lifecycle state of an [`EventClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Link open, loops running.
    Connected,
    /// Cleanup in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live half of a connection, readable from any task.
struct Link {
    session: u64,
    transport: Arc<dyn Transport>,
    outbound: mpsc::Sender<Vec<u8>>,
    stop: CancellationToken,
}

/// Loop handles, owned by connect/cleanup only.
struct Workers {
    session: u64,
    receive: JoinHandle<()>,
    send: JoinHandle<()>,
}

struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    link: RwLock<Option<Link>>,
    lifecycle: Mutex<Option<Workers>>,
    state: watch::Sender<ConnectionState>,
    callbacks: CallbackSet,
    next_session: AtomicU64,
    dropped: AtomicU64,
}

/// Duplex event client.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
///                      \______________ open failed ________________/
/// ```
pub struct EventClient {
    shared: Arc<Shared>,
}

impl EventClient {
    /// Client that connects over WebSocket.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Client that opens links through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                link: RwLock::new(None),
                lifecycle: Mutex::new(None),
                state,
                callbacks: CallbackSet::new(),
                next_session: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Open the transport and start the loops.
    ///
    /// Already connected: logs a warning and returns `Ok`. On failure the
    /// client is cleaned up and the error is returned; there is no retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let shared = &self.shared;
        let url = shared.config.url.as_str();
        let mut workers = shared.lifecycle.lock().await;

        if shared.is_connected() {
            warn!(url, "already connected");
            return Ok(());
        }
        let mut attempt = ConnectAttempt {
            shared: shared.as_ref(),
            finished: false,
        };
        // A link that died on its own may not have been reaped yet.
        shared.teardown(&mut workers).await;

        shared.set_state(ConnectionState::Connecting);
        info!(url, "connecting");

        let options = shared.config.transport_options();
        let opened = shared.connector.open(url, &options).await;
        attempt.finished = true;
        let transport = match opened {
            Ok(transport) => transport,
            Err(err) => {
                error!(url, error = %err, "connection failed");
                shared.teardown(&mut workers).await;
                return Err(err.into());
            }
        };

        let session = shared.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let stop = CancellationToken::new();
        let (outbound, queue) = mpsc::channel(shared.config.send_queue_capacity.max(1));

        *shared.link.write() = Some(Link {
            session,
            transport: transport.clone(),
            outbound,
            stop: stop.clone(),
        });
        shared.set_state(ConnectionState::Connected);

        let receive = tokio::spawn(RECEIVE_SESSION.scope(
            session,
            receive_loop(shared.clone(), transport.clone(), stop.clone()),
        ));
        let send = tokio::spawn(send_loop(shared.clone(), transport, queue, stop));
        *workers = Some(Workers {
            session,
            receive,
            send,
        });

        info!(url, session, "connected");
        Ok(())
    }

    /// Stop the loops and close the transport.
    ///
    /// Not connected (no link, or the transport already reports closed):
    /// logs a warning and returns. A link that died on its own is reaped by
    /// its receive loop or by the next [`connect`](Self::connect). Otherwise
    /// returns once cleanup has finished. Queued outbound messages are
    /// discarded.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let mut workers = shared.lifecycle.lock().await;
        if !shared.is_connected() {
            warn!(url = %shared.config.url, "not connected");
            return;
        }
        info!(url = %shared.config.url, "disconnecting");
        shared.teardown(&mut workers).await;
    }

    /// Encode an event and queue it for sending.
    ///
    /// `None` data is sent as nil. Returns whether the message was queued;
    /// it is rejected when not connected, when encoding fails, or when the
    /// queue is full (counted in [`dropped_messages`](Self::dropped_messages)).
    pub fn send_event(&self, event_type: &str, data: Option<Value>) -> bool {
        let link = self.shared.link.read();
        let Some(link) = link.as_ref().filter(|link| link.transport.is_open()) else {
            error!(event_type, "cannot send event: not connected");
            return false;
        };

        let data = data.unwrap_or(Value::Nil);
        let payload = match encode_event(event_type, &data) {
            Ok(payload) => payload,
            Err(err) => {
                error!(event_type, error = %err, "failed to encode event");
                return false;
            }
        };

        match link.outbound.try_send(payload) {
            Ok(()) => {
                debug!(event_type, session = link.session, "event queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(event_type, dropped, "send queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(event_type, dropped, "send queue closed, dropping event");
                false
            }
        }
    }

    /// Wait until connected. `None` waits indefinitely.
    pub async fn wait_connected(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.shared.state.subscribe();
        let connected = state.wait_for(|s| *s == ConnectionState::Connected);
        match timeout {
            Some(limit) => matches!(tokio::time::timeout(limit, connected).await, Ok(Ok(_))),
            None => connected.await.is_ok(),
        }
    }

    /// Register a callback for every inbound event.
    ///
    /// The client keeps only a weak reference. Returns `false` if the same
    /// callback was already registered.
    pub fn add_event_callback<C: EventCallback + 'static>(&self, callback: &Arc<C>) -> bool {
        self.shared.callbacks.add(callback)
    }

    /// Unregister a callback. Returns whether it was registered.
    pub fn remove_event_callback<C: EventCallback + 'static>(&self, callback: &Arc<C>) -> bool {
        self.shared.callbacks.remove(callback)
    }

    /// Whether a transport is present and reports open.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Configured peer address.
    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    /// Events dropped because the outbound queue was full or closed.
    pub fn dropped_messages(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of live callbacks.
    pub fn callback_count(&self) -> usize {
        self.shared.callbacks.len()
    }
}

/// Resets the state to `Disconnected` if a `connect` call is dropped
/// before the open attempt finishes.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(url = %self.shared.config.url, "connect abandoned");
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        // The receive loop sees the stop signal and runs cleanup.
        if let Some(link) = self.shared.link.read().as_ref() {
            link.stop.cancel();
        }
    }
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.link
            .read()
            .as_ref()
            .is_some_and(|link| link.transport.is_open())
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(url = %self.config.url, state = %next, "connection state changed");
        }
    }

    async fn cleanup(&self) {
        let mut workers = self.lifecycle.lock().await;
        self.teardown(&mut workers).await;
    }

    /// Tear down the current link. Caller holds the lifecycle lock.
    ///
    /// A receive loop calling this for a session that is no longer current
    /// is a no-op, and a loop never aborts itself.
    async fn teardown(&self, workers: &mut Option<Workers>) {
        let caller = RECEIVE_SESSION.try_with(|session| *session).ok();
        if let Some(session) = caller {
            if workers.as_ref().is_none_or(|w| w.session != session) {
                debug!(session, "stale cleanup ignored");
                return;
            }
        }

        let link = self.link.write().take();
        let workers = workers.take();
        if link.is_none() && workers.is_none() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.set_state(ConnectionState::Disconnecting);

        if let Some(link) = &link {
            link.stop.cancel();
            let queued = link.outbound.max_capacity() - link.outbound.capacity();
            if queued > 0 {
                debug!(queued, "discarding queued messages");
            }
        }

        if let Some(w) = workers {
            w.send.abort();
            let _ = w.send.await;
            if caller == Some(w.session) {
                debug!(session = w.session, "cleanup running on receive loop");
            } else {
                w.receive.abort();
                let _ = w.receive.await;
            }
        }

        if let Some(link) = link {
            if let Err(err) = link.transport.close().await {
                debug!(error = %err, "error closing transport");
            }
            info!(url = %self.config.url, session = link.session, "disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        match Envelope::decode(bytes) {
            Ok(envelope) => {
                debug!(event_type = %envelope.event_type, "event received");
                self.callbacks
                    .dispatch(&envelope.event_type, &envelope.data)
                    .await;
            }
            Err(err @ (EnvelopeError::NotAMap { .. } | EnvelopeError::InvalidType { .. })) => {
                warn!(error = %err, "invalid message format");
            }
            Err(err) => {
                error!(error = %err, bytes = bytes.len(), "failed to decode message");
            }
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>, stop: CancellationToken) {
    let url = shared.config.url.as_str();
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            next = transport.receive() => next,
        };

        match next {
            Ok(Some(Frame::Binary(bytes))) => shared.handle_frame(&bytes).await,
            Ok(Some(Frame::Text(text))) => {
                warn!(len = text.len(), "received non-binary message, ignoring");
            }
            Ok(None) => {
                info!(url, "connection closed by peer");
                break;
            }
            Err(err) => {
                error!(url, error = %err, "receive failed");
                break;
            }
        }
    }
    debug!("receive loop stopped");
    shared.cleanup().await;
}

async fn send_loop(
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    mut queue: mpsc::Receiver<Vec<u8>>,
    stop: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            payload = queue.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        if stop.is_cancelled() {
            break;
        }

        let len = payload.len();
        if !transport.is_open() {
            warn!(bytes = len, "transport not open, dropping message");
            continue;
        }
        match transport.send(payload).await {
            Ok(()) => debug!(bytes = len, "message sent"),
            Err(err) => {
                error!(error = %err, bytes = len, "send failed");
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(shared.config.send_retry_delay) => {}
                }
            }
        }
    }
    debug!("send loop stopped");
}
