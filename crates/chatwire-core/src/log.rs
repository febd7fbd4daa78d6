//! Deduplicating message log.
//!
//! The log is append-mostly and ordered by arrival. Every insertion, whether
//! from a history seed or a live `message:new`, is checked against the whole
//! log. A candidate is a duplicate of an existing entry when either
//!
//! - both carry a present id and the ids are equal, or
//! - text and sender type match and the timestamps are less than
//!   [`DEDUP_WINDOW_MS`] apart.
//!
//! The second rule catches live echoes whose permanent id was not yet known
//! when an earlier copy was recorded. It will also merge two genuinely
//! distinct messages with identical text sent by the same side within the
//! window.

use crate::types::ChatMessage;

/// Content-match window for the timestamp heuristic.
pub const DEDUP_WINDOW_MS: i64 = 2000;

/// Whether `candidate` should be treated as the same logical message as `existing`.
pub fn is_duplicate(existing: &ChatMessage, candidate: &ChatMessage) -> bool {
    if let (Some(a), Some(b)) = (existing.present_id(), candidate.present_id()) {
        if a == b {
            return true;
        }
    }

    existing.text == candidate.text
        && existing.sender_type == candidate.sender_type
        && (existing.created_at - candidate.created_at)
            .num_milliseconds()
            .abs()
            < DEDUP_WINDOW_MS
}

/// Ordered message log that never holds two duplicates.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `msg` unless it duplicates an entry already in the log.
    ///
    /// Returns `true` if the message was appended.
    pub fn insert(&mut self, msg: ChatMessage) -> bool {
        if self.entries.iter().any(|e| is_duplicate(e, &msg)) {
            return false;
        }
        self.entries.push(msg);
        true
    }

    /// Merge a history batch in order. Each item goes through the same check
    /// as a live arrival, including against items earlier in the batch.
    ///
    /// Returns the messages that were actually appended.
    pub fn seed(&mut self, batch: impl IntoIterator<Item = ChatMessage>) -> Vec<ChatMessage> {
        let mut appended = Vec::new();
        for msg in batch {
            if self.insert(msg.clone()) {
                appended.push(msg);
            }
        }
        appended
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
