//! Bus event types: what the session engine tells its observers.

use crate::types::{ChatMessage, ConnectionState, Identity};

/// An observable change in the chat session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The session has an identity and the UI may accept input.
    Started(Identity),
    /// The live channel moved to a new state.
    StateChanged(ConnectionState),
    /// A message was appended to the log.
    MessageAppended(ChatMessage),
    /// A history seed was merged. Holds only the messages that were
    /// appended, in log order.
    HistorySeeded(Vec<ChatMessage>),
    /// History could not be loaded. The session continues with the live channel.
    HistoryFailed(String),
    /// The live channel reported an error.
    ConnectionError(String),
}

impl SessionEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Started(_) => "started",
            SessionEvent::StateChanged(_) => "state_changed",
            SessionEvent::MessageAppended(_) => "message_appended",
            SessionEvent::HistorySeeded(_) => "history_seeded",
            SessionEvent::HistoryFailed(_) => "history_failed",
            SessionEvent::ConnectionError(_) => "connection_error",
        }
    }
}
