//! Bounded hand-off queue between the reader thread and the ingestion loop
//!
//! Pushing never blocks: when the queue is full the oldest line is evicted
//! so the newest arrival is always admitted. Popping never blocks either.

use chrono::{DateTime, Utc};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default queue capacity in lines
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// A decoded text line and the time it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl DecodedLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Lock-free bounded queue with oldest-eviction
#[derive(Debug)]
pub struct LineQueue {
    inner: ArrayQueue<DecodedLine>,
    dropped: AtomicU64,
}

impl LineQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a line, evicting the oldest one when full
    ///
    /// Returns `true` if a line was evicted to make room.
    pub fn push(&self, line: DecodedLine) -> bool {
        match self.inner.force_push(line) {
            Some(_evicted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Take the oldest line, or `None` if empty
    pub fn pop(&self) -> Option<DecodedLine> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Total lines evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
