//! Error types shared by every Chatwire component.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// None of these are fatal: the coordinator maps each one onto a consistent
/// session state (never half-started, never a corrupted log).
#[derive(Debug, Error)]
pub enum ChatError {
    /// History request failed. The session proceeds with an empty seed.
    #[error("history fetch failed: {0}")]
    HistoryFetch(String),

    /// The live channel could not be opened or dropped mid-session.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server never acknowledged a handshake.
    #[error("no acknowledgement for {0} within the timeout")]
    HandshakeTimeout(String),

    /// The server acknowledged a handshake with an unusable payload.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Operation requires an identity but no session has started.
    #[error("no chat session has been started")]
    NotStarted,

    /// `start_new` called while an identity already exists.
    #[error("a chat session is already started")]
    AlreadyStarted,

    /// The live channel is not in a state that accepts outbound events.
    #[error("live channel is not connected")]
    NotConnected,

    /// Outbound message was blank after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// Malformed frame on the live channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to read or write persisted session state.
    #[error("session store io error at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for session engine operations.
pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Create a store error for the given path.
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Whether the start flow may simply be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Connection(_)
                | ChatError::HandshakeTimeout(_)
                | ChatError::HandshakeRejected(_)
                | ChatError::NotConnected
        )
    }
}
