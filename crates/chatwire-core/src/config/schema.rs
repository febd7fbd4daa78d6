//! Configuration schema.
//!
//! Hierarchy: `Config` → `ServerConfig`, `ConnectionConfig` (→ `ReconnectConfig`),
//! `HistoryConfig`, `SessionConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.chatwire/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub history: HistoryConfig,
    pub session: SessionConfig,
}

// ─────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────

/// Chat backend location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Base URL of the backend. The live channel connects to the same host.
    pub url: String,
    /// Path prefix of the REST API under `url`.
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_string(),
            api_prefix: "api/be".to_string(),
        }
    }
}

impl ServerConfig {
    /// REST API base (`{url}/{api_prefix}`), without a trailing slash.
    pub fn api_base(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }
}

// ─────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────

/// Live channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// How long to wait for the channel to open before a start handshake.
    pub connect_timeout_secs: u64,
    /// How long to wait for a `customer:start` acknowledgement.
    pub ack_timeout_secs: u64,
    /// Automatic reconnect supervisor (off by default).
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            ack_timeout_secs: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff with jitter for the optional reconnect supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// First delay after an error.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubled delay.
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failures. 0 = never give up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

// ─────────────────────────────────────────────
// History
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Request timeout for the history fetch.
    pub timeout_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

/// Persisted identity location.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Custom session file. Defaults to `~/.chatwire/session.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
