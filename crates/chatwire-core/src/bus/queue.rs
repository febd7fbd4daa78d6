//! Session event queue backed by a bounded `tokio::sync::mpsc` channel.

use super::types::SessionEvent;
use tokio::sync::mpsc;
use tracing::warn;

/// The event bus connecting the session engine to its front end.
///
/// - Connection manager, message stream and coordinator publish events
/// - The front end consumes them in order
///
/// Publishing never waits: if the consumer falls behind and the buffer is
/// full the event is dropped with a warning. Observers are for display only;
/// the message log stays the source of truth.
pub struct EventBus {
    tx: mpsc::Sender<SessionEvent>,
    rx: tokio::sync::Mutex<mpsc::Receiver<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        EventBus {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Publish an event. Returns `false` if it was dropped.
    pub fn publish(&self, event: SessionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = event.kind(), "event bus full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Consume the next event (waits until one is available).
    pub async fn consume(&self) -> Option<SessionEvent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Drain everything currently queued.
    pub async fn drain(&self) -> Vec<SessionEvent> {
        let mut rx = self.rx.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
