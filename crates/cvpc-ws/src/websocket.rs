//! [`Transport`] over a `tokio-tungstenite` WebSocket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::keepalive::{LinkHealth, run_keepalive};
use crate::transport::{Connector, Frame, Transport, TransportOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Data frames buffered between the reader task and `receive`.
const INBOUND_CAPACITY: usize = 256;

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        url: &str,
        options: &TransportOptions,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = options.connect_timeout.as_millis() as u64;

        let (ws, _response) = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout { timeout_ms })?
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        info!(url, "websocket connected");
        Ok(Arc::new(WsTransport::start(ws, options)))
    }
}

/// An open WebSocket connection.
///
/// A reader task drains the socket continuously: it records pongs and
/// closure on the shared [`LinkHealth`] and forwards data frames to
/// [`receive`](Transport::receive) through a bounded queue. Liveness therefore
/// does not depend on how quickly the caller consumes frames; only a full
/// queue pauses reading. When keepalive is enabled a second task pings the
/// peer and marks the link dead if a pong does not come back in time.
pub struct WsTransport {
    sink: Arc<Mutex<WsSink>>,
    inbound: Mutex<mpsc::Receiver<Frame>>,
    health: Arc<LinkHealth>,
    stop: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WsTransport {
    fn start(ws: WsStream, options: &TransportOptions) -> Self {
        let (sink, stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let health = Arc::new(LinkHealth::new());
        let stop = CancellationToken::new();
        let (frames, inbound) = mpsc::channel(INBOUND_CAPACITY);

        let mut tasks = vec![tokio::spawn(read_frames(
            stream,
            frames,
            health.clone(),
            stop.clone(),
        ))];

        if let Some(interval) = options.ping_interval {
            let sink = sink.clone();
            let health = health.clone();
            let cancel = stop.clone();
            let timeout = options.ping_timeout;
            tasks.push(tokio::spawn(async move {
                let result = run_keepalive(health, interval, timeout, cancel, move || {
                    let sink = sink.clone();
                    async move {
                        sink.lock()
                            .await
                            .send(Message::Ping(Vec::new().into()))
                            .await
                            .map_err(|e| TransportError::Send(e.to_string()))
                    }
                })
                .await;
                debug!(?result, "keepalive stopped");
            }));
        }

        Self {
            sink,
            inbound: Mutex::new(inbound),
            health,
            stop,
            tasks: parking_lot::Mutex::new(tasks),
        }
    }

    fn stop_tasks(&self) {
        self.stop.cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    fn dead_error(&self) -> TransportError {
        self.health.failure().unwrap_or(TransportError::Closed)
    }
}

/// Drain `stream` until it ends, the link dies, or `stop` fires.
///
/// Dropping `frames` on exit is what ends [`WsTransport::receive`] once the
/// queued frames have been consumed.
async fn read_frames(
    mut stream: SplitStream<WsStream>,
    frames: mpsc::Sender<Frame>,
    health: Arc<LinkHealth>,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = health.died() => break,
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes.to_vec()),
            Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
            Some(Ok(Message::Pong(_))) => {
                health.record_pong();
                continue;
            }
            // tungstenite queues the pong reply itself.
            Some(Ok(Message::Ping(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "peer sent close frame");
                health.mark_closed();
                break;
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                health.mark_closed();
                break;
            }
            Some(Err(e)) => {
                health.mark_dead(TransportError::Protocol(e.to_string()));
                break;
            }
        };

        let forwarded = tokio::select! {
            biased;
            () = stop.cancelled() => false,
            () = health.died() => false,
            sent = frames.send(frame) => sent.is_ok(),
        };
        if !forwarded {
            break;
        }
    }
    debug!("websocket reader stopped");
}

#[async_trait]
impl Transport for WsTransport {
    async fn receive(&self) -> Result<Option<Frame>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(frame) => Ok(Some(frame)),
            None => self.health.failure().map_or(Ok(None), Err),
        }
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.health.is_open() {
            return Err(self.dead_error());
        }
        self.sink
            .lock()
            .await
            .send(Message::Binary(payload.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.health.mark_closed();

        let result = {
            let mut sink = self.sink.lock().await;
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
                Ok(Err(e)) => Err(TransportError::Protocol(e.to_string())),
                Err(_) => Err(TransportError::Protocol("close handshake timed out".into())),
            }
        };
        self.stop_tasks();
        result
    }

    fn is_open(&self) -> bool {
        self.health.is_open()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
