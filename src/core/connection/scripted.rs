//! Scripted in-memory connection
//!
//! Stands in for a serial port in tests and demos: the [`ScriptedHandle`]
//! feeds inbound chunks, records outbound writes and can inject failures.

use super::{Connection, ConnectionError};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Shared {
    written: Mutex<Vec<Bytes>>,
    fail_writes: AtomicUsize,
    short_write: Mutex<Option<usize>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

/// Connection end handed to the reader
pub struct ScriptedConnection {
    inbound: Receiver<Bytes>,
    /// Tail of a chunk that did not fit into the last read buffer
    pending: Option<Bytes>,
    shared: Arc<Shared>,
}

/// Remote end kept by the test or host
#[derive(Clone)]
pub struct ScriptedHandle {
    inbound: Sender<Bytes>,
    shared: Arc<Shared>,
}

impl ScriptedConnection {
    /// Create a connected pair
    pub fn new() -> (Self, ScriptedHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());
        (
            Self {
                inbound: rx,
                pending: None,
                shared: shared.clone(),
            },
            ScriptedHandle { inbound: tx, shared },
        )
    }
}

impl ScriptedHandle {
    /// Queue one inbound chunk.
    ///
    /// A chunk that fits the reader's buffer is returned by exactly one read;
    /// a larger one is split across consecutive reads.
    pub fn feed(&self, data: impl Into<Bytes>) {
        let _ = self.inbound.send(data.into());
    }

    /// Close the connection from the remote side
    pub fn hang_up(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with an I/O error
    pub fn fail_next_writes(&self, n: usize) {
        self.shared.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Accept at most `limit` bytes of every following write
    pub fn limit_writes(&self, limit: usize) {
        *self.shared.short_write.lock() = Some(limit);
    }

    /// Payloads written so far, in order
    pub fn written(&self) -> Vec<Bytes> {
        self.shared.written.lock().clone()
    }

    /// Number of times the connection was closed while open
    pub fn close_count(&self) -> usize {
        self.shared.close_count.load(Ordering::SeqCst)
    }

    /// Whether the connection is closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Connection for ScriptedConnection {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }

        let mut chunk = match self.pending.take() {
            Some(rest) => rest,
            None => match self.inbound.recv_timeout(timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return Ok(0),
            },
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk.split_to(n));
        if !chunk.is_empty() {
            self.pending = Some(chunk);
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }

        let failing = self
            .shared
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }

        let accepted = match *self.shared.short_write.lock() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        self.shared
            .written
            .lock()
            .push(Bytes::copy_from_slice(&data[..accepted]));
        Ok(accepted)
    }

    fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_returns_fed_chunk() {
        let (mut conn, handle) = ScriptedConnection::new();
        handle.feed(&b"hello"[..]);

        let mut buf = [0u8; 16];
        let n = conn.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_oversized_chunk_spans_reads() {
        let (mut conn, handle) = ScriptedConnection::new();
        handle.feed(&b"abcdefgh"[..]);
        handle.feed(&b"ij"[..]);

        let mut buf = [0u8; 3];
        let mut received = Vec::new();
        for _ in 0..4 {
            let n = conn.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
            received.push(buf[..n].to_vec());
        }
        assert_eq!(received, [b"abc".to_vec(), b"def".to_vec(), b"gh".to_vec(), b"ij".to_vec()]);
    }

    #[test]
    fn test_read_times_out_without_data() {
        let (mut conn, _handle) = ScriptedConnection::new();
        let mut buf = [0u8; 16];
        assert_eq!(conn.read_timeout(&mut buf, Duration::from_millis(5)).unwrap(), 0);
    }

    #[test]
    fn test_write_failure_injection() {
        let (mut conn, handle) = ScriptedConnection::new();
        handle.fail_next_writes(1);

        assert!(conn.write(b"a").is_err());
        assert_eq!(conn.write(b"b").unwrap(), 1);
        assert_eq!(handle.written(), vec![Bytes::from_static(b"b")]);
    }

    #[test]
    fn test_close_counts_once() {
        let (mut conn, handle) = ScriptedConnection::new();
        conn.close();
        conn.close();
        assert_eq!(handle.close_count(), 1);
        assert!(!conn.is_open());
    }
}
