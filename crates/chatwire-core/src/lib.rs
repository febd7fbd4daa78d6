//! Chatwire core: data model, deduplicating log, identity persistence,
//! event bus, and configuration shared by the client and the CLI.
//!
//! - **types**: `Identity`, `ChatMessage`, `ConnectionState`, `CustomerInfo`
//! - **log**: `MessageLog`, the id-or-heuristic dedup rule
//! - **session**: `SessionStore` trait with file and in-memory backends
//! - **bus**: `EventBus` of `SessionEvent`s for the front end
//! - **config**: `~/.chatwire/config.json` + env overrides
//! - **error**: `ChatError`

pub mod bus;
pub mod config;
pub mod error;
pub mod log;
pub mod session;
pub mod types;
pub mod utils;

pub use error::{ChatError, Result};
pub use types::{ChatMessage, ConnectionState, CustomerInfo, Identity, MessageId, SenderType};
