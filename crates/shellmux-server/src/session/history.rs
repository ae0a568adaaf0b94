//! Bounded per-session command history.
//!
//! Keeps the last N submitted commands so that a client can ask what was
//! run in a session without the server keeping unbounded history.

use shellmux_core::HistoryEntry;
use std::collections::VecDeque;

/// Default number of commands retained per session.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// A fixed-capacity, insertion-ordered list of commands.
#[derive(Debug)]
pub struct CommandHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_HISTORY)),
            capacity,
        }
    }

    /// Append a command, evicting the oldest entries once over capacity.
    pub fn record(&mut self, command: impl Into<String>, timestamp: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(HistoryEntry {
            command: command.into(),
            timestamp: timestamp.into(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `limit` entries (all if `None`), oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let n = limit.map_or(self.entries.len(), |l| l.min(self.entries.len()));
        self.entries
            .iter()
            .skip(self.entries.len() - n)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
