//! Bounded log of received messages.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One received message.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Message type tag.
    pub message_type: String,
    /// Frame size in bytes.
    pub size: usize,
    /// Receive time.
    pub received_at: DateTime<Utc>,
    /// True for `mode_changed` and `performance_metrics`.
    pub meta: bool,
    /// The raw JSON text.
    pub raw: String,
}

/// Newest-first message log that keeps at most `limit` entries.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl MessageHistory {
    /// Creates an empty log.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(128)),
            limit,
        }
    }

    /// Adds an entry, evicting the oldest one past the limit.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
    }

    /// Returns up to `limit` newest entries, optionally data messages only.
    pub fn recent(&self, limit: usize, data_only: bool) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| !data_only || !entry.meta)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
