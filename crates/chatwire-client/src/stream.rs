//! MessageStream: the shared, deduplicating message log of one session.
//!
//! History seeds and live arrivals both land here. A single async mutex
//! serializes every mutation, so whichever of the two finishes first, the
//! final log is the same set of messages.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use chatwire_core::bus::{EventBus, SessionEvent};
use chatwire_core::log::MessageLog;
use chatwire_core::ChatMessage;

/// Result of a single insertion attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insert {
    Appended,
    Duplicate,
    /// The stream was torn down; nothing was written.
    Closed,
}

#[derive(Default)]
struct StreamState {
    log: MessageLog,
    closed: bool,
}

pub struct MessageStream {
    state: Mutex<StreamState>,
    bus: Arc<EventBus>,
}

impl MessageStream {
    pub fn new(bus: Arc<EventBus>) -> Self {
        MessageStream {
            state: Mutex::new(StreamState::default()),
            bus,
        }
    }

    /// Merge one live message.
    pub async fn push(&self, msg: ChatMessage) -> Insert {
        let mut state = self.state.lock().await;
        if state.closed {
            debug!("message stream closed, dropping live message");
            return Insert::Closed;
        }
        if !state.log.insert(msg.clone()) {
            trace!(id = ?msg.id, "duplicate live message");
            return Insert::Duplicate;
        }
        self.bus.publish(SessionEvent::MessageAppended(msg));
        Insert::Appended
    }

    /// Merge a history batch. Returns how many items were appended, or `None`
    /// if the stream was already closed.
    pub async fn seed(&self, batch: Vec<ChatMessage>) -> Option<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            debug!(items = batch.len(), "message stream closed, dropping history");
            return None;
        }
        let total = batch.len();
        let appended = state.log.seed(batch);
        let count = appended.len();
        debug!(received = total, appended = count, "history merged");
        self.bus.publish(SessionEvent::HistorySeeded(appended));
        Some(count)
    }

    /// Copy of the log in display order.
    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.state.lock().await.log.entries().to_vec()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.log.is_empty()
    }

    /// Stop accepting writes. Later pushes and seeds are no-ops.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Empty the log and accept writes again.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.log.clear();
        state.closed = false;
    }
}
