//! ConnectionManager: lifecycle of the live channel.
//!
//! State machine:
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──open──▶ Connected ──resume──▶ Resuming
//!      ▲                      │                    │                    │
//!      └──── closed ──────────┴────────────────────┴────── first event ─┘ → Connected
//!                 any state ──error──▶ Errored ──reconnect──▶ Connecting
//! ```
//!
//! Only the manager writes the state; everyone else watches it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatwire_core::bus::{EventBus, SessionEvent};
use chatwire_core::config::ConnectionConfig;
use chatwire_core::{ChatError, ChatMessage, ConnectionState, CustomerInfo, Identity, Result};

use crate::stream::MessageStream;
use crate::transport::{LiveTransport, TransportEvent};

/// Outbound: open a new conversation (acknowledged).
pub const EVENT_START: &str = "customer:start";
/// Outbound: re-attach an existing conversation to this channel.
pub const EVENT_RESUME: &str = "customer:resume";
/// Outbound: customer message.
pub const EVENT_MESSAGE: &str = "customer:message";
/// Inbound: a message appended to the conversation.
pub const EVENT_MESSAGE_NEW: &str = "message:new";

const TRANSPORT_EVENT_BUFFER: usize = 64;

/// Acknowledgement payload of `customer:start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAck {
    #[serde(default)]
    conversation_id: Option<Value>,
    #[serde(default, alias = "accessToken")]
    customer_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Turn a `customer:start` ack into an identity, rejecting incomplete ones.
fn identity_from_ack(ack: Value, display_name: &str) -> Result<Identity> {
    if !ack.is_object() {
        return Err(ChatError::HandshakeRejected(format!(
            "unexpected acknowledgement payload: {ack}"
        )));
    }
    let ack: StartAck = serde_json::from_value(ack)
        .map_err(|e| ChatError::HandshakeRejected(format!("malformed acknowledgement: {e}")))?;

    if let Some(reason) = ack.error {
        return Err(ChatError::HandshakeRejected(reason));
    }

    let conversation_id = match ack.conversation_id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let token = ack.customer_token.unwrap_or_default();

    if conversation_id.is_empty() || token.is_empty() {
        return Err(ChatError::HandshakeRejected(
            "acknowledgement is missing the conversation id or token".into(),
        ));
    }

    Ok(Identity::new(conversation_id, token, display_name))
}

// ─────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────

struct Inner {
    transport: Arc<dyn LiveTransport>,
    stream: Arc<MessageStream>,
    bus: Arc<EventBus>,
    state_tx: watch::Sender<ConnectionState>,
    identity: RwLock<Option<Identity>>,
    /// Channels that reached Open, over the manager's lifetime.
    opened: AtomicU64,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "connection state");
            self.bus.publish(SessionEvent::StateChanged(next));
        }
    }

    fn fail(&self, reason: String) {
        error!(reason = %reason, "live channel error");
        self.bus.publish(SessionEvent::ConnectionError(reason));
        self.set_state(ConnectionState::Errored);
    }

    /// Consume transport events until the channel ends.
    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Open => self.on_open().await,
                TransportEvent::Event { name, data } => self.on_event(&name, data).await,
                TransportEvent::Error(reason) => {
                    self.fail(reason);
                    break;
                }
                TransportEvent::Closed(reason) => {
                    info!(reason = reason.as_deref().unwrap_or("none"), "live channel closed");
                    if self.state() != ConnectionState::Errored {
                        self.set_state(ConnectionState::Disconnected);
                    }
                    break;
                }
            }
        }
        debug!("transport event pump finished");
    }

    async fn on_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);

        let identity = self.identity.read().await.clone();
        let Some(identity) = identity else {
            return;
        };

        let payload = json!({
            "conversationId": identity.conversation_id,
            "customerToken": identity.access_token,
        });
        match self.transport.emit(EVENT_RESUME, payload).await {
            Ok(()) => {
                info!(conversation = %identity.conversation_id, "resuming conversation");
                self.set_state(ConnectionState::Resuming);
            }
            Err(e) => self.fail(format!("resume failed: {e}")),
        }
    }

    async fn on_event(&self, name: &str, data: Value) {
        match name {
            EVENT_MESSAGE_NEW => match serde_json::from_value::<ChatMessage>(data) {
                Ok(msg) => {
                    self.stream.push(msg).await;
                }
                Err(e) => warn!(error = %e, "ignoring malformed message:new payload"),
            },
            other => debug!(event = other, "unhandled live event"),
        }

        // Any server traffic after a resume means it was accepted.
        if self.state() == ConnectionState::Resuming {
            self.set_state(ConnectionState::Connected);
        }
    }
}

/// Owns the single live channel of a session.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    config: ConnectionConfig,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start / reconnect / stop.
    lifecycle: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        stream: Arc<MessageStream>,
        bus: Arc<EventBus>,
        config: ConnectionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            inner: Arc::new(Inner {
                transport,
                stream,
                bus,
                state_tx,
                identity: RwLock::new(None),
                opened: AtomicU64::new(0),
            }),
            config,
            pump: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().await.clone()
    }

    /// How many channels have opened so far. Grows by one per successful
    /// connect, even when the state moves on before a watcher sees Connected.
    pub fn opened_count(&self) -> u64 {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Open the live channel, resuming `identity` if given.
    ///
    /// No-op while a channel is already Connecting, Connected or Resuming.
    pub async fn start(&self, identity: Option<Identity>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        if let Some(identity) = identity {
            *self.inner.identity.write().await = Some(identity);
        }

        let state = self.state();
        if state.is_active() {
            debug!(state = %state, "live channel already active");
            return Ok(());
        }
        self.open_channel().await
    }

    /// Reopen the channel after an error or disconnect. The resume handshake
    /// is re-issued when an identity is known.
    pub async fn reconnect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let state = self.state();
        if state.is_active() {
            debug!(state = %state, "reconnect skipped, channel active");
            return Ok(());
        }

        info!(from = %state, "reconnecting live channel");
        self.teardown().await;
        self.open_channel().await
    }

    /// Close the channel and stop the event pump.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Drop the in-memory identity (session reset).
    pub async fn forget_identity(&self) {
        *self.inner.identity.write().await = None;
    }

    /// Negotiate a brand-new conversation.
    ///
    /// Opens the channel if needed, waits for it, then emits `customer:start`
    /// and waits for the acknowledgement. On a failed handshake no identity is
    /// recorded and the channel is closed, so a retry starts from a fresh one.
    pub async fn start_new(&self, info: &CustomerInfo) -> Result<Identity> {
        if self.identity().await.is_some() {
            return Err(ChatError::AlreadyStarted);
        }

        self.start(None).await?;
        self.wait_until_ready().await?;

        let payload = json!({
            "name": info.name,
            "phone": info.phone,
            "message": info.message,
        });
        let acked = self
            .inner
            .transport
            .emit_with_ack(EVENT_START, payload, self.ack_timeout())
            .await;
        let identity = match acked.and_then(|ack| identity_from_ack(ack, &info.name)) {
            Ok(identity) => identity,
            Err(e) => {
                // A late ack or echo belongs to a conversation we never adopted.
                warn!(error = %e, "start handshake failed, dropping the channel");
                self.stop().await;
                self.inner.stream.clear().await;
                return Err(e);
            }
        };

        {
            let mut slot = self.inner.identity.write().await;
            if slot.is_some() {
                warn!("identity appeared while start handshake was in flight");
                return Err(ChatError::AlreadyStarted);
            }
            *slot = Some(identity.clone());
        }

        info!(conversation = %identity.conversation_id, "conversation started");
        Ok(identity)
    }

    /// Emit a customer message. Text is trimmed; delivery is confirmed only
    /// by the server echoing it back as `message:new`.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let identity = self.identity().await.ok_or(ChatError::NotStarted)?;
        if !self.state().can_send() {
            return Err(ChatError::NotConnected);
        }

        let payload = json!({
            "conversationId": identity.conversation_id,
            "customerToken": identity.access_token,
            "message": text,
        });
        self.inner.transport.emit(EVENT_MESSAGE, payload).await
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.config.ack_timeout_secs)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    /// Wait until the channel can carry emits.
    async fn wait_until_ready(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(
            self.connect_timeout(),
            rx.wait_for(|s| s.can_send() || *s == ConnectionState::Errored),
        )
        .await;

        let state = match waited {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => return Err(ChatError::NotConnected),
            Err(_) => {
                return Err(ChatError::Connection(format!(
                    "live channel did not open within {}s",
                    self.config.connect_timeout_secs
                )))
            }
        };

        if state == ConnectionState::Errored {
            return Err(ChatError::Connection("live channel failed to open".into()));
        }
        Ok(())
    }

    async fn open_channel(&self) -> Result<()> {
        self.inner.set_state(ConnectionState::Connecting);

        let (tx, rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let pump = tokio::spawn(self.inner.clone().pump(rx));
        if let Some(old) = self.pump.lock().await.replace(pump) {
            old.abort();
        }

        if let Err(e) = self.inner.transport.open(tx).await {
            self.inner.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn teardown(&self) {
        if let Err(e) = self.inner.transport.close().await {
            warn!(error = %e, "error closing live channel");
        }
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.try_lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
