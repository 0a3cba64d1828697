//! In-memory event buffers
//!
//! Each namespace accumulates events between WAL flushes. A buffer flushes
//! when it reaches 100 events or 64 KiB of JSON, whichever comes first.

use crate::event::{Event, EventBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub max_events: usize,
    pub max_bytes: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            max_events: 100,
            max_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    pub events: Vec<Event>,
    pub first_seq: u64,
    pub last_seq: u64,
    pub size_bytes: usize,
}

impl EventBuffer {
    pub fn push(&mut self, event: Event) {
        if self.events.is_empty() {
            self.first_seq = event.seq;
        }
        self.last_seq = event.seq;
        self.size_bytes += event.encoded_len();
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn should_flush(&self, thresholds: &FlushThresholds) -> bool {
        self.events.len() >= thresholds.max_events || self.size_bytes >= thresholds.max_bytes
    }

    /// Drain into a WAL batch, resetting the buffer. The next buffered event
    /// continues the sequence from `last_seq`.
    pub fn take(&mut self, ns: &str) -> EventBatch {
        let batch = EventBatch {
            ns: ns.to_string(),
            first_seq: self.first_seq,
            last_seq: self.last_seq,
            events: std::mem::take(&mut self.events),
        };
        self.first_seq = self.last_seq;
        self.size_bytes = 0;
        batch
    }
}
