//! Outbound write queue
//!
//! Any thread may push; only the reader thread drains. The queue has its own
//! lock, independent of the delimiter.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO of pending outbound payloads
#[derive(Debug, Default)]
pub struct WriteQueue {
    inner: Mutex<VecDeque<Bytes>>,
}

impl WriteQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one payload
    pub fn push(&self, payload: Bytes) {
        self.inner.lock().push_back(payload);
    }

    /// Take every queued payload at once, in enqueue order.
    ///
    /// The lock is released before the caller writes anything, so producers
    /// never wait on the connection.
    pub fn drain(&self) -> VecDeque<Bytes> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Number of queued payloads
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Discard all queued payloads, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}
