//! LiveTransport trait: the bidirectional event channel to the chat backend.
//!
//! The connection manager only sees this interface:
//! - `open()`: begin connecting in the background, reporting progress as
//!   [`TransportEvent`]s on the supplied channel
//! - `emit()` / `emit_with_ack()`: send a named event, optionally waiting
//!   for the server's acknowledgement
//! - `close()`: tear the channel down

use std::time::Duration;

use async_trait::async_trait;
use chatwire_core::Result;
use serde_json::Value;
use tokio::sync::mpsc;

/// Signals reported by a transport while its channel is open.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The channel is ready for emits.
    Open,
    /// A named event pushed by the server.
    Event { name: String, data: Value },
    /// The channel failed. No further events follow.
    Error(String),
    /// The channel closed. No further events follow.
    Closed(Option<String>),
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Start connecting. Returns once the attempt is under way; the outcome
    /// arrives as `Open` or `Error` on `events`.
    ///
    /// Calling `open` while a channel is already running is a no-op.
    async fn open(&self, events: mpsc::Sender<TransportEvent>) -> Result<()>;

    /// Fire-and-forget emit.
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Emit and wait up to `timeout` for the server's acknowledgement.
    async fn emit_with_ack(&self, event: &str, payload: Value, timeout: Duration)
        -> Result<Value>;

    /// Close the channel. Safe to call when nothing is open.
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}

// ─────────────────────────────────────────────
// Test double
// ─────────────────────────────────────────────
