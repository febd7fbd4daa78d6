//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! A websocket text frame carries one Engine.IO packet: a single digit type
//! followed by its payload. Engine.IO `message` packets in turn carry one
//! Socket.IO packet:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json payload>]
//! ```
//!
//! Only the default namespace is used; packets addressed to any other
//! namespace are rejected, as are binary packets (types 5 and 6).

use chatwire_core::{ChatError, Result};
use serde::Deserialize;
use serde_json::Value;

// ─────────────────────────────────────────────
// Engine.IO
// ─────────────────────────────────────────────

/// Transport-level packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnginePacket {
    /// Handshake JSON sent by the server when the socket opens.
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(raw: &str) -> Result<Self> {
        let kind = leading_digit(raw, "engine.io")?;
        let payload = raw[1..].to_string();

        match kind {
            '0' => Ok(EnginePacket::Open(payload)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(payload)),
            '3' => Ok(EnginePacket::Pong(payload)),
            '4' => Ok(EnginePacket::Message(payload)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ChatError::Protocol(format!(
                "unknown engine.io packet type '{other}'"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(p) => format!("0{p}"),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(p) => format!("2{p}"),
            EnginePacket::Pong(p) => format!("3{p}"),
            EnginePacket::Message(p) => format!("4{p}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Payload of the Engine.IO `open` packet.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    /// Milliseconds between server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Grace period after a missed ping before the link counts as dead.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenHandshake {
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

// ─────────────────────────────────────────────
// Socket.IO
// ─────────────────────────────────────────────

/// Application-level packet carried inside an Engine.IO message.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect. The server's reply carries `{"sid": ..}`.
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Build an event packet with a single argument.
    pub fn event(name: impl Into<String>, payload: Value, ack_id: Option<u64>) -> Self {
        SocketPacket::Event {
            ack_id,
            name: name.into(),
            args: vec![payload],
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let kind = leading_digit(raw, "socket.io")?;
        let mut rest = &raw[1..];

        // A namespace, when present, ends at the first comma.
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let namespace = &rest[..end];
            if namespace != "/" {
                return Err(ChatError::Protocol(format!(
                    "packet for unsupported namespace {namespace}"
                )));
            }
            rest = rest.get(end + 1..).unwrap_or("");
        }

        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ChatError::Protocol(format!("bad ack id: {e}")))?;
            Some(id)
        } else {
            None
        };

        let payload = &rest[digits..];
        let data: Option<Value> = if payload.is_empty() {
            None
        } else {
            Some(serde_json::from_str(payload)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect(data)),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut args = into_array(data);
                if args.is_empty() {
                    return Err(ChatError::Protocol("event packet without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ChatError::Protocol(format!(
                            "event name must be a string, got {other}"
                        )))
                    }
                };
                Ok(SocketPacket::Event { ack_id, name, args })
            }
            '3' => {
                let ack_id = ack_id
                    .ok_or_else(|| ChatError::Protocol("ack packet without an id".into()))?;
                Ok(SocketPacket::Ack {
                    ack_id,
                    args: into_array(data),
                })
            }
            '4' => Ok(SocketPacket::ConnectError(data.unwrap_or(Value::Null))),
            '5' | '6' => Err(ChatError::Protocol(
                "binary socket.io packets are not supported".into(),
            )),
            other => Err(ChatError::Protocol(format!(
                "unknown socket.io packet type '{other}'"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{auth}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { ack_id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!("2{}{}", id_prefix(*ack_id), Value::Array(array))
            }
            SocketPacket::Ack { ack_id, args } => {
                format!("3{ack_id}{}", Value::Array(args.clone()))
            }
            SocketPacket::ConnectError(data) => format!("4{data}"),
        }
    }

    /// Encode as a complete websocket text frame (`4` + socket packet).
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn leading_digit(raw: &str, layer: &str) -> Result<char> {
    match raw.chars().next() {
        Some(c) if c.is_ascii_digit() => Ok(c),
        Some(c) => Err(ChatError::Protocol(format!(
            "{layer} packet starts with '{c}'"
        ))),
        None => Err(ChatError::Protocol(format!("empty {layer} packet"))),
    }
}

fn id_prefix(ack_id: Option<u64>) -> String {
    ack_id.map(|id| id.to_string()).unwrap_or_default()
}

fn into_array(data: Option<Value>) -> Vec<Value> {
    match data {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
