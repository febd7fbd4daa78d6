//! Identity persistence.
//!
//! File format: JSON object in `~/.chatwire/session.json`
//! - `chat_conversationId`: conversation id issued by the server
//! - `chat_customerToken`: opaque access token
//! - `chat_customerName`: display name

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::types::Identity;
use crate::utils;

/// Storage key for the conversation id.
pub const KEY_CONVERSATION_ID: &str = "chat_conversationId";
/// Storage key for the access token.
pub const KEY_CUSTOMER_TOKEN: &str = "chat_customerToken";
/// Storage key for the display name.
pub const KEY_CUSTOMER_NAME: &str = "chat_customerName";

// ─────────────────────────────────────────────
// SessionStore trait
// ─────────────────────────────────────────────

/// Durable storage for the identity triple.
///
/// `load` never returns a half-populated identity: a missing or empty
/// conversation id or token means "no session".
pub trait SessionStore: Send + Sync {
    /// Last saved identity, if a complete one exists.
    fn load(&self) -> Option<Identity>;

    /// Persist `identity` so it survives a process restart.
    fn save(&self, identity: &Identity) -> Result<()>;

    /// Remove any persisted identity.
    fn clear(&self) -> Result<()>;
}

/// Build an identity from raw stored entries, rejecting partial ones.
fn identity_from_entries(entries: &HashMap<String, String>) -> Option<Identity> {
    let conversation_id = entries.get(KEY_CONVERSATION_ID).filter(|v| !v.is_empty())?;
    let access_token = entries.get(KEY_CUSTOMER_TOKEN).filter(|v| !v.is_empty())?;
    let display_name = entries.get(KEY_CUSTOMER_NAME).cloned().unwrap_or_default();

    Some(Identity::new(
        conversation_id.clone(),
        access_token.clone(),
        display_name,
    ))
}

fn entries_from_identity(identity: &Identity) -> HashMap<String, String> {
    HashMap::from([
        (KEY_CONVERSATION_ID.to_string(), identity.conversation_id.clone()),
        (KEY_CUSTOMER_TOKEN.to_string(), identity.access_token.clone()),
        (KEY_CUSTOMER_NAME.to_string(), identity.display_name.clone()),
    ])
}

// ─────────────────────────────────────────────
// FileSessionStore
// ─────────────────────────────────────────────

/// Stores the identity as a small JSON file.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Create a store at `path`, defaulting to `~/.chatwire/session.json`.
    ///
    /// Nothing touches the disk until the first `save`.
    pub fn new(path: Option<PathBuf>) -> Self {
        FileSessionStore {
            path: path.unwrap_or_else(utils::get_session_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Option<HashMap<String, String>> {
        if !self.path.exists() {
            return None;
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read session file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Failed to parse session file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<Identity> {
        let entries = self.read_entries()?;
        let identity = identity_from_entries(&entries);
        match &identity {
            Some(id) => debug!(
                conversation = %id.conversation_id,
                "Loaded session from {}",
                self.path.display()
            ),
            None => debug!("Session file {} holds no complete identity", self.path.display()),
        }
        identity
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ChatError::store(parent, e))?;
        }

        let json = serde_json::to_string_pretty(&entries_from_identity(identity))?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| ChatError::store(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ChatError::store(&self.path, e))?;

        debug!(
            conversation = %identity.conversation_id,
            "Saved session to {}",
            self.path.display()
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Deleted session file: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::store(&self.path, e)),
        }
    }
}

// ─────────────────────────────────────────────
// MemorySessionStore
// ─────────────────────────────────────────────

/// In-process store for tests and sessions that should not outlive the process.
#[derive(Default)]
pub struct MemorySessionStore {
    identity: Mutex<Option<Identity>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if a previous run had saved `identity`.
    pub fn with_identity(identity: Identity) -> Self {
        MemorySessionStore {
            identity: Mutex::new(Some(identity)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Identity> {
        let guard = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|id| !id.conversation_id.is_empty() && !id.access_token.is_empty())
            .cloned()
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
