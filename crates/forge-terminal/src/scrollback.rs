//! Bounded per-session output log used for replay on reattach

use std::collections::VecDeque;

use super::DEFAULT_SCROLLBACK_BYTES;

/// Append-only chunk log capped by total byte size
///
/// Eviction is FIFO from the oldest end. The most recent chunk is always kept,
/// even when it alone exceeds the cap.
#[derive(Debug, Clone)]
pub struct Scrollback {
    chunks: VecDeque<String>,
    total_bytes: usize,
    capacity: usize,
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SCROLLBACK_BYTES)
    }
}

impl Scrollback {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            capacity,
        }
    }

    pub fn append(&mut self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);

        while self.total_bytes > self.capacity && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.total_bytes -= evicted.len();
            }
        }
    }

    /// Everything currently retained, oldest first, as one string
    pub fn replay_payload(&self) -> String {
        let mut payload = String::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            payload.push_str(chunk);
        }
        payload
    }

    pub fn len_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
