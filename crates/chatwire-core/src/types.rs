//! Core types for Chatwire: the identity triple, chat messages, and the
//! connection state shared between the client components.
//!
//! Wire and storage formats use **camelCase** keys; Rust uses snake_case.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────

/// The durable triple identifying a customer's conversation.
///
/// Issued by the server on `customer:start` or restored from the
/// [`SessionStore`](crate::session::SessionStore). Never mutated once a
/// session holds it; a session reset drops it entirely.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Server-side conversation identifier.
    pub conversation_id: String,
    /// Opaque credential authorizing access to the conversation.
    pub access_token: String,
    /// Name the customer gave when the conversation started.
    pub display_name: String,
}

impl Identity {
    pub fn new(
        conversation_id: impl Into<String>,
        access_token: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Identity {
            conversation_id: conversation_id.into(),
            access_token: access_token.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("conversation_id", &self.conversation_id)
            .field("access_token", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// New-session details supplied by the customer before the first handshake.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
    /// Opening message; the server echoes it back on the live channel.
    pub message: String,
}

impl CustomerInfo {
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CustomerInfo {
            name: name.into(),
            phone: phone.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// Server-assigned message id. The backend sends either JSON numbers or
/// strings; `Number(1)` and `Text("1")` are distinct ids.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl MessageId {
    /// Empty strings and zero carry no identity and never match another id.
    pub fn is_present(&self) -> bool {
        match self {
            MessageId::Number(n) => *n != 0,
            MessageId::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::Text(s.to_string())
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Customer,
    Agent,
}

/// A single chat message as delivered by history fetches and `message:new`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub text: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message without an id.
    pub fn new(text: impl Into<String>, sender_type: SenderType, created_at: DateTime<Utc>) -> Self {
        ChatMessage {
            id: None,
            text: text.into(),
            sender_type,
            sender_name: None,
            created_at,
        }
    }

    /// Create a customer-authored message.
    pub fn customer(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(text, SenderType::Customer, created_at)
    }

    /// Create an agent-authored message.
    pub fn agent(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(text, SenderType::Agent, created_at)
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// The id, if it is one that can identify the message.
    pub fn present_id(&self) -> Option<&MessageId> {
        self.id.as_ref().filter(|id| id.is_present())
    }
}

// ─────────────────────────────────────────────
// Connection state
// ─────────────────────────────────────────────

/// Lifecycle state of the live channel.
///
/// Owned by the connection manager; everything else only observes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Rest state, waiting for an explicit start.
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Resume handshake sent, waiting for the server to start talking.
    Resuming,
    /// Connect failure or mid-session drop. Recoverable by reconnect.
    Errored,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Resuming => "resuming",
            ConnectionState::Errored => "errored",
        }
    }

    /// Whether a channel is open or being opened.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Resuming
        )
    }

    /// Whether outbound events can be emitted.
    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Resuming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
