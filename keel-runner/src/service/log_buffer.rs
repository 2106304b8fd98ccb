//! Log buffer service
//!
//! Collects the log entries of one node block. Entries are drained once the
//! block finishes and attached to its result.

use keel_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex, PoisonError};

/// Service for managing log buffers
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Returns all buffered entries and clears the buffer
    fn drain(&self) -> Vec<LogEntry>;

    /// Number of entries currently buffered
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory implementation of LogBufferService
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::log::LogLevel;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InMemoryLogBuffer::new();
        buffer.add_entry(LogEntry::now(LogLevel::Info, "first"));
        buffer.add_entry(LogEntry::now(LogLevel::Error, "second"));
        assert_eq!(buffer.len(), 2);

        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].level, LogLevel::Error);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = InMemoryLogBuffer::new();
        let clone = buffer.clone();
        clone.add_entry(LogEntry::now(LogLevel::Debug, "shared"));
        assert_eq!(buffer.drain().len(), 1);
    }
}
