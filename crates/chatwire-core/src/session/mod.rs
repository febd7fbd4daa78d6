//! Persisted session identity.
//!
//! # Disk format
//!
//! `~/.chatwire/session.json` holds three string entries:
//! `{"chat_conversationId": "...", "chat_customerToken": "...", "chat_customerName": "..."}`

pub mod store;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
