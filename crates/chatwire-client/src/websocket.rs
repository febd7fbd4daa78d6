//! Socket.IO client over a raw websocket.
//!
//! Speaks just enough Engine.IO v4 / Socket.IO v5 for the chat backend:
//! - websocket transport only (no long-polling upgrade dance)
//! - default namespace, JSON payloads
//! - server pings answered with pongs; a missed ping window drops the link
//! - client acks tracked by id with a oneshot per pending emit

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use chatwire_core::{ChatError, Result};

use crate::socketio::{EnginePacket, OpenHandshake, SocketPacket};
use crate::transport::{LiveTransport, TransportEvent};

/// Liveness window used until the server's handshake states its own.
const DEFAULT_LIVENESS: Duration = Duration::from_secs(45);

/// How long `close()` waits for the session task to wind down.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────
// URL
// ─────────────────────────────────────────────

/// Turn the backend base URL into the Engine.IO websocket endpoint.
///
/// `http://host:3001` → `ws://host:3001/socket.io/?EIO=4&transport=websocket`
pub fn engine_url(server_url: &str) -> Result<String> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ChatError::Connection(format!("invalid server url '{server_url}': {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatError::Connection(format!(
                "unsupported url scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Connection(format!("cannot switch url to {scheme}")))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));

    Ok(url.to_string())
}

// ─────────────────────────────────────────────
// SocketIoTransport
// ─────────────────────────────────────────────

struct Session {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    /// Outbound frame queue of the running session.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Emits waiting for an ack, by ack id.
    pending: Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>,
    next_ack_id: AtomicU64,
    /// Set once the namespace connect is confirmed.
    open: AtomicBool,
    session: Mutex<Option<Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`LiveTransport`] speaking Socket.IO over `tokio-tungstenite`.
pub struct SocketIoTransport {
    url: String,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SocketIoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoTransport")
            .field("url", &self.url)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SocketIoTransport {
    /// Create a transport for the backend at `server_url` (http or https).
    pub fn new(server_url: &str) -> Result<Self> {
        Ok(SocketIoTransport {
            url: engine_url(server_url)?,
            shared: Arc::new(Shared::default()),
        })
    }

    fn send_frame(&self, frame: String) -> Result<()> {
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(ChatError::NotConnected);
        }
        let writer = lock(&self.shared.writer);
        match writer.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ChatError::NotConnected),
            None => Err(ChatError::NotConnected),
        }
    }
}

#[async_trait]
impl LiveTransport for SocketIoTransport {
    async fn open(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        let mut session = lock(&self.shared.session);
        if let Some(running) = session.as_ref() {
            if !running.task.is_finished() {
                debug!("socket.io session already running");
                return Ok(());
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let url = self.url.clone();
        let task = tokio::spawn(run_session(shared, url, events, shutdown_rx));

        *session = Some(Session {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        debug!(event, "emit");
        self.send_frame(SocketPacket::event(event, payload, None).to_frame())
    }

    async fn emit_with_ack(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let ack_id = self.shared.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(ack_id, tx);

        debug!(event, ack_id, "emit with ack");
        let frame = SocketPacket::event(event, payload, Some(ack_id)).to_frame();
        if let Err(e) = self.send_frame(frame) {
            lock(&self.shared.pending).remove(&ack_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            Ok(Err(_)) => Err(ChatError::Connection(
                "channel closed before acknowledgement".into(),
            )),
            Err(_) => {
                lock(&self.shared.pending).remove(&ack_id);
                warn!(event, ack_id, "acknowledgement timed out");
                Err(ChatError::HandshakeTimeout(event.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let session = lock(&self.shared.session).take();
        if let Some(session) = session {
            let _ = session.shutdown.send(());
            let mut task = session.task;
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("socket.io session did not stop in time, aborting");
                task.abort();
            }
        }
        self.shared.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────
// Session task
// ─────────────────────────────────────────────

enum Flow {
    Continue,
    /// Liveness confirmed; optionally with a new window from the handshake.
    Alive(Option<Duration>),
    Close(String),
}

async fn run_session(
    shared: Arc<Shared>,
    url: String,
    events: mpsc::Sender<TransportEvent>,
    shutdown: oneshot::Receiver<()>,
) {
    let outcome = drive(&shared, &url, &events, shutdown).await;

    shared.open.store(false, Ordering::SeqCst);
    *lock(&shared.writer) = None;
    // Dropping the waiters fails every in-flight ack.
    lock(&shared.pending).clear();

    let event = match outcome {
        Ok(reason) => {
            info!(reason = %reason, "live channel closed");
            TransportEvent::Closed(Some(reason))
        }
        Err(e) => {
            warn!(error = %e, "live channel failed");
            TransportEvent::Error(e.to_string())
        }
    };
    let _ = events.send(event).await;
}

/// One websocket session. Returns the close reason, or an error when the
/// link failed.
async fn drive(
    shared: &Shared,
    url: &str,
    events: &mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<String> {
    debug!(url = %url, "connecting live channel");

    let (ws_stream, _) = tokio::select! {
        res = tokio_tungstenite::connect_async(url) => {
            res.map_err(|e| ChatError::Connection(e.to_string()))?
        }
        _ = &mut shutdown => return Ok("closed by client".to_string()),
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
    *lock(&shared.writer) = Some(tx.clone());

    let mut window = DEFAULT_LIVENESS;
    let idle = tokio::time::sleep(window);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(t))) => t.to_string(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Ok(reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ChatError::Connection(e.to_string())),
                    None => return Ok("stream ended".to_string()),
                };

                match handle_frame(shared, &tx, events, &text).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Alive(new_window)) => {
                        if let Some(w) = new_window {
                            window = w;
                        }
                        idle.as_mut().reset(Instant::now() + window);
                    }
                    Ok(Flow::Close(reason)) => return Ok(reason),
                    Err(e @ ChatError::Connection(_)) => return Err(e),
                    Err(e) => warn!(error = %e, frame = %text, "ignoring malformed frame"),
                }
            }
            Some(frame) = outbound.recv() => {
                write
                    .send(WsMessage::text(frame))
                    .await
                    .map_err(|e| ChatError::Connection(e.to_string()))?;
            }
            _ = &mut idle => {
                return Err(ChatError::Connection(format!(
                    "no ping from server within {}ms",
                    window.as_millis()
                )));
            }
            _ = &mut shutdown => {
                let _ = write.send(WsMessage::text(SocketPacket::Disconnect.to_frame())).await;
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok("closed by client".to_string());
            }
        }
    }
}

fn queue(tx: &mpsc::UnboundedSender<String>, frame: String) {
    if tx.send(frame).is_err() {
        debug!("outbound queue closed, frame dropped");
    }
}

async fn handle_frame(
    shared: &Shared,
    tx: &mpsc::UnboundedSender<String>,
    events: &mpsc::Sender<TransportEvent>,
    raw: &str,
) -> Result<Flow> {
    match EnginePacket::decode(raw)? {
        EnginePacket::Open(payload) => {
            let handshake = OpenHandshake::parse(&payload)?;
            debug!(
                sid = %handshake.sid,
                ping_interval = handshake.ping_interval,
                ping_timeout = handshake.ping_timeout,
                "engine.io handshake"
            );
            queue(tx, SocketPacket::Connect(None).to_frame());
            let window = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
            Ok(Flow::Alive(Some(window)))
        }
        EnginePacket::Ping(payload) => {
            queue(tx, EnginePacket::Pong(payload).encode());
            Ok(Flow::Alive(None))
        }
        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Ok(Flow::Continue),
        EnginePacket::Close => Ok(Flow::Close("closed by server".to_string())),
        EnginePacket::Message(inner) => match SocketPacket::decode(&inner)? {
            SocketPacket::Connect(_) => {
                shared.open.store(true, Ordering::SeqCst);
                info!("live channel open");
                let _ = events.send(TransportEvent::Open).await;
                Ok(Flow::Continue)
            }
            SocketPacket::Disconnect => Ok(Flow::Close("disconnected by server".to_string())),
            SocketPacket::Event { ack_id, name, args } => {
                if let Some(ack_id) = ack_id {
                    queue(tx, SocketPacket::Ack { ack_id, args: vec![] }.to_frame());
                }
                let data = args.into_iter().next().unwrap_or(Value::Null);
                let _ = events.send(TransportEvent::Event { name, data }).await;
                Ok(Flow::Continue)
            }
            SocketPacket::Ack { ack_id, args } => {
                let waiter = lock(&shared.pending).remove(&ack_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(args);
                    }
                    None => debug!(ack_id, "ack for unknown or expired id"),
                }
                Ok(Flow::Continue)
            }
            SocketPacket::ConnectError(data) => {
                let reason = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| data.to_string());
                Err(ChatError::Connection(reason))
            }
        },
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
