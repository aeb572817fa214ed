//! Background serial line reader
//!
//! A [`SerialReader`] takes an already-open [`Connection`], moves it onto a
//! dedicated thread and runs a single loop there:
//!
//! 1. write every queued outbound payload, in order
//! 2. wait up to the read timeout for inbound bytes
//! 3. buffer them and emit each complete, non-empty, delimiter-terminated line
//!
//! The host talks to the loop through two independently locked structures
//! (the write queue and the delimiter cell) and a stop flag. Stopping is
//! cooperative: the loop notices the flag at its next polling boundary, so a
//! stop takes effect within one read timeout plus the time to drain writes.
//!
//! ```rust,no_run
//! use serline_core::{ReaderConfig, SerialConfig, SerialConnection, SerialReader};
//!
//! # fn main() -> anyhow::Result<()> {
//! let connection = SerialConnection::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//! let (mut reader, lines) = SerialReader::with_channel(Box::new(connection), ReaderConfig::default());
//! reader.start()?;
//! reader.enqueue_write(&b"AT\r\n"[..]);
//! if let Ok(line) = lines.recv() {
//!     println!("{line}");
//! }
//! reader.stop();
//! let _closed = reader.join()?;
//! # Ok(())
//! # }
//! ```

use super::connection::Connection;
use super::delimiter::{Delimiter, DelimiterCell};
use super::framer::{DecodeMode, LineFramer};
use super::sink::{async_sink, channel_sink, LineSink};
use super::write_queue::WriteQueue;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Reader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Upper bound of one read poll, in milliseconds
    pub read_timeout_ms: u64,
    /// Size of the reusable read buffer
    pub read_buffer_size: usize,
    /// Delimiter active when the reader starts
    pub delimiter: Delimiter,
    /// How inbound bytes are decoded
    pub decode_mode: DecodeMode,
    /// Name of the reader thread
    pub thread_name: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 100,
            read_buffer_size: 4096,
            delimiter: Delimiter::CrLf,
            decode_mode: DecodeMode::Segment,
            thread_name: "serline-reader".to_string(),
        }
    }
}

impl ReaderConfig {
    /// Read poll bound as a [`Duration`], never shorter than 1 ms
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Set the read poll bound
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the initial delimiter
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<Delimiter>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Set the decode mode
    #[must_use]
    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }
}

/// Reader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed, not started
    Created,
    /// Loop running
    Running,
    /// Stop requested or connection lost; loop winding down
    Stopping,
    /// Loop exited and connection closed. Terminal.
    Stopped,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Misuse of the reader control surface
#[derive(Error, Debug)]
pub enum ReaderError {
    /// `start` called on a running reader
    #[error("Reader already started")]
    AlreadyStarted,

    /// `start` called after the reader finished
    #[error("Reader has finished and cannot be restarted")]
    Finished,

    /// `join` called before `start`
    #[error("Reader was never started")]
    NotStarted,

    /// `join` called twice
    #[error("Reader already joined")]
    AlreadyJoined,

    /// The OS refused to spawn the reader thread
    #[error("Failed to spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The reader thread panicked, usually inside a line sink
    #[error("Reader thread panicked")]
    Panicked,
}

/// Reader statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Bytes accepted by the connection
    pub bytes_written: u64,
    /// Payloads written in full
    pub payloads_written: u64,
    /// Failed or short writes
    pub write_errors: u64,
    /// Payloads discarded because the reader stopped first
    pub payloads_discarded: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Lines delivered to the sink
    pub lines_emitted: u64,
    /// Empty segments dropped
    pub segments_dropped: u64,
}

struct Shared {
    running: AtomicBool,
    state: RwLock<ReaderState>,
    queue: WriteQueue,
    delimiter: DelimiterCell,
    stats: Mutex<ReaderStats>,
    buffered: AtomicUsize,
}

/// Cloneable control handle usable from any thread
#[derive(Clone)]
pub struct ReaderHandle {
    shared: Arc<Shared>,
}

impl ReaderHandle {
    /// Queue a payload for writing. Returns immediately; the queue is unbounded.
    pub fn enqueue_write(&self, payload: impl Into<Bytes>) {
        self.shared.queue.push(payload.into());
    }

    /// Replace the delimiter used from the next scan pass on
    pub fn set_delimiter(&self, delimiter: impl Into<Delimiter>) {
        let delimiter = delimiter.into();
        tracing::debug!(delimiter = %delimiter, "Delimiter changed");
        self.shared.delimiter.set(delimiter);
    }

    /// Current delimiter
    pub fn delimiter(&self) -> Delimiter {
        self.shared.delimiter.snapshot()
    }

    /// Ask the loop to exit at its next polling boundary. Does not wait.
    ///
    /// Idempotent. Has no effect on a reader that was never started.
    pub fn stop(&self) {
        let mut state = self.shared.state.write();
        if *state == ReaderState::Running {
            *state = ReaderState::Stopping;
            self.shared.running.store(false, Ordering::SeqCst);
            tracing::info!("Reader stop requested");
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        *self.shared.state.read()
    }

    /// Whether the loop is running and no stop was requested
    pub fn is_running(&self) -> bool {
        self.state() == ReaderState::Running
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> ReaderStats {
        *self.shared.stats.lock()
    }

    /// Bytes buffered but not yet framed into a line
    pub fn buffered_len(&self) -> usize {
        self.shared.buffered.load(Ordering::SeqCst)
    }

    /// Payloads queued but not yet written
    pub fn pending_writes(&self) -> usize {
        self.shared.queue.len()
    }
}

type Pending = (Box<dyn Connection>, Box<dyn LineSink>);

/// Background reader-writer loop over one connection
pub struct SerialReader {
    control: ReaderHandle,
    config: ReaderConfig,
    pending: Mutex<Option<Pending>>,
    handle: Option<JoinHandle<Box<dyn Connection>>>,
    joined: bool,
}

impl SerialReader {
    /// Bind an open connection and a line sink with the default configuration
    pub fn new(connection: Box<dyn Connection>, sink: impl LineSink) -> Self {
        Self::with_config(connection, sink, ReaderConfig::default())
    }

    /// Bind an open connection and a line sink
    pub fn with_config(
        connection: Box<dyn Connection>,
        sink: impl LineSink,
        config: ReaderConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            state: RwLock::new(ReaderState::Created),
            queue: WriteQueue::new(),
            delimiter: DelimiterCell::new(config.delimiter.clone()),
            stats: Mutex::new(ReaderStats::default()),
            buffered: AtomicUsize::new(0),
        });

        Self {
            control: ReaderHandle { shared },
            config,
            pending: Mutex::new(Some((connection, Box::new(sink)))),
            handle: None,
            joined: false,
        }
    }

    /// Reader delivering lines into a crossbeam channel
    pub fn with_channel(
        connection: Box<dyn Connection>,
        config: ReaderConfig,
    ) -> (Self, crossbeam_channel::Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::with_config(connection, channel_sink(tx), config), rx)
    }

    /// Reader delivering lines into a tokio channel
    pub fn with_async_channel(
        connection: Box<dyn Connection>,
        config: ReaderConfig,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self::with_config(connection, async_sink(tx), config), rx)
    }

    /// Spawn the loop thread. `Created → Running`.
    pub fn start(&mut self) -> Result<(), ReaderError> {
        let shared = self.control.shared.clone();
        let (connection, sink) = {
            let mut state = shared.state.write();
            match *state {
                ReaderState::Created => {}
                ReaderState::Running | ReaderState::Stopping => {
                    return Err(ReaderError::AlreadyStarted)
                }
                ReaderState::Stopped => return Err(ReaderError::Finished),
            }
            let pending = self.pending.lock().take().ok_or(ReaderError::Finished)?;
            shared.running.store(true, Ordering::SeqCst);
            *state = ReaderState::Running;
            pending
        };

        let config = self.config.clone();
        let loop_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_loop(connection, sink, &loop_shared, &config));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                *shared.state.write() = ReaderState::Stopped;
                tracing::error!(error = %e, "Failed to spawn reader thread");
                Err(ReaderError::Spawn(e))
            }
        }
    }

    /// Ask the loop to exit at its next polling boundary. Does not wait.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Wait for the loop to exit, then hand back the closed connection.
    ///
    /// Call [`SerialReader::stop`] first unless the remote side is expected to
    /// close the connection.
    pub fn join(&mut self) -> Result<Box<dyn Connection>, ReaderError> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None if self.joined => return Err(ReaderError::AlreadyJoined),
            None => return Err(ReaderError::NotStarted),
        };
        self.joined = true;

        handle.join().map_err(|_| {
            let shared = &self.control.shared;
            shared.running.store(false, Ordering::SeqCst);
            *shared.state.write() = ReaderState::Stopped;
            tracing::error!("Reader thread panicked");
            ReaderError::Panicked
        })
    }

    /// Queue a payload for writing. Thread-safe, unbounded, non-blocking.
    pub fn enqueue_write(&self, payload: impl Into<Bytes>) {
        self.control.enqueue_write(payload);
    }

    /// Replace the delimiter used from the next scan pass on
    pub fn set_delimiter(&self, delimiter: impl Into<Delimiter>) {
        self.control.set_delimiter(delimiter);
    }

    /// Current delimiter
    pub fn delimiter(&self) -> Delimiter {
        self.control.delimiter()
    }

    /// Cloneable handle for other threads
    pub fn handle(&self) -> ReaderHandle {
        self.control.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        self.control.state()
    }

    /// Whether the loop is running and no stop was requested
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> ReaderStats {
        self.control.stats()
    }

    /// Bytes buffered but not yet framed into a line
    pub fn buffered_len(&self) -> usize {
        self.control.buffered_len()
    }

    /// Payloads queued but not yet written
    pub fn pending_writes(&self) -> usize {
        self.control.pending_writes()
    }

    /// Configuration the reader was built with
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            if let Err(e) = self.join() {
                tracing::warn!(error = %e, "Reader failed while being dropped");
            }
        }
    }
}

fn run_loop(
    mut connection: Box<dyn Connection>,
    mut sink: Box<dyn LineSink>,
    shared: &Shared,
    config: &ReaderConfig,
) -> Box<dyn Connection> {
    let timeout = config.read_timeout();
    let mut framer = LineFramer::new(config.decode_mode);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    tracing::info!(
        connection = %connection.describe(),
        delimiter = %shared.delimiter.snapshot(),
        timeout_ms = config.read_timeout_ms,
        "Reader started"
    );

    while shared.running.load(Ordering::SeqCst) && connection.is_open() {
        flush_writes(connection.as_mut(), shared);

        match connection.read_timeout(&mut buf, timeout) {
            Ok(0) => {}
            Ok(n) => {
                framer.push(&buf[..n]);

                let delimiter = shared.delimiter.snapshot();
                let summary = framer.drain_lines(&delimiter, |line| {
                    tracing::trace!(line = %line, "Line received");
                    sink.deliver(line);
                });
                shared.buffered.store(framer.buffered_len(), Ordering::SeqCst);

                let mut stats = shared.stats.lock();
                stats.bytes_read += n as u64;
                stats.lines_emitted += summary.lines as u64;
                stats.segments_dropped += summary.dropped as u64;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Read failed; treating as no data");
                shared.stats.lock().read_errors += 1;
                // A failing port usually fails instantly; keep the poll bounded, not hot.
                thread::sleep(timeout);
            }
        }
    }

    {
        let mut state = shared.state.write();
        if *state == ReaderState::Running {
            tracing::info!("Connection closed by peer");
            *state = ReaderState::Stopping;
        }
    }
    shared.running.store(false, Ordering::SeqCst);

    let discarded = shared.queue.clear();
    if discarded > 0 {
        tracing::debug!(payloads = discarded, "Discarding writes queued after stop");
        shared.stats.lock().payloads_discarded += discarded as u64;
    }

    if connection.is_open() {
        connection.close();
    }

    *shared.state.write() = ReaderState::Stopped;
    tracing::info!(
        buffered = framer.buffered_len(),
        lines = shared.stats.lock().lines_emitted,
        "Reader stopped"
    );
    connection
}

fn flush_writes(connection: &mut dyn Connection, shared: &Shared) {
    for payload in shared.queue.drain() {
        match connection.write(&payload) {
            Ok(n) if n >= payload.len() => {
                let mut stats = shared.stats.lock();
                stats.bytes_written += n as u64;
                stats.payloads_written += 1;
            }
            Ok(n) => {
                tracing::warn!(
                    written = n,
                    discarded = payload.len() - n,
                    "Short write; discarding remainder"
                );
                let mut stats = shared.stats.lock();
                stats.bytes_written += n as u64;
                stats.write_errors += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "Write failed; payload dropped");
                shared.stats.lock().write_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{ConnectionError, MockConnection};

    fn fast_config() -> ReaderConfig {
        ReaderConfig::default().with_read_timeout(Duration::from_millis(10))
    }

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
        assert_eq!(config.delimiter, Delimiter::CrLf);
        assert_eq!(config.decode_mode, DecodeMode::Segment);
    }

    #[test]
    fn test_zero_read_timeout_is_clamped() {
        let config = ReaderConfig {
            read_timeout_ms: 0,
            ..ReaderConfig::default()
        };
        assert_eq!(config.read_timeout(), Duration::from_millis(1));

        let config = ReaderConfig::default().with_read_timeout(Duration::ZERO);
        assert_eq!(config.read_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_read_timeout_reaches_connection_clamped() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout().returning(|_, timeout| {
            assert!(timeout >= Duration::from_millis(1));
            thread::sleep(timeout);
            Ok(0)
        });
        conn.expect_close().times(1).return_const(());

        let config = ReaderConfig {
            read_timeout_ms: 0,
            ..ReaderConfig::default()
        };
        let mut reader = SerialReader::with_config(Box::new(conn), |_line: String| {}, config);
        reader.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        reader.stop();
        reader.join().unwrap();
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_write_failure_does_not_stop_loop() {
        let written = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout().returning(|_, timeout| {
            thread::sleep(timeout);
            Ok(0)
        });
        let sink = written.clone();
        let counter = calls.clone();
        conn.expect_write().returning(move |data| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                )));
            }
            sink.lock().push(data.to_vec());
            Ok(data.len())
        });
        conn.expect_close().times(1).return_const(());

        let mut reader = SerialReader::with_config(Box::new(conn), |_line: String| {}, fast_config());
        reader.enqueue_write(&b"first"[..]);
        reader.enqueue_write(&b"second"[..]);
        reader.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while reader.stats().payloads_written < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        reader.stop();
        reader.join().unwrap();

        assert_eq!(*written.lock(), vec![b"second".to_vec()]);
        let stats = reader.stats();
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.payloads_written, 1);
    }

    #[test]
    fn test_read_errors_are_absorbed() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout()
            .returning(|_, _| Err(ConnectionError::Io(std::io::ErrorKind::Other.into())));
        conn.expect_close().times(1).return_const(());

        let mut reader = SerialReader::with_config(Box::new(conn), |_line: String| {}, fast_config());
        reader.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(reader.state(), ReaderState::Running);

        reader.stop();
        reader.join().unwrap();
        assert!(reader.stats().read_errors >= 1);
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_control_surface_misuse() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout().returning(|_, timeout| {
            thread::sleep(timeout);
            Ok(0)
        });
        conn.expect_close().times(1).return_const(());

        let mut reader = SerialReader::with_config(Box::new(conn), |_line: String| {}, fast_config());
        assert!(matches!(reader.join(), Err(ReaderError::NotStarted)));

        reader.stop();
        assert_eq!(reader.state(), ReaderState::Created);

        reader.start().unwrap();
        assert!(matches!(reader.start(), Err(ReaderError::AlreadyStarted)));

        reader.stop();
        reader.stop();
        reader.join().unwrap();
        assert_eq!(reader.state(), ReaderState::Stopped);
        assert!(matches!(reader.join(), Err(ReaderError::AlreadyJoined)));
        assert!(matches!(reader.start(), Err(ReaderError::Finished)));
    }

    #[test]
    fn test_closed_connection_ends_loop_without_close() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(false);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_close().never();

        let mut reader = SerialReader::with_config(Box::new(conn), |_line: String| {}, fast_config());
        reader.start().unwrap();
        let connection = reader.join().unwrap();
        assert!(!connection.is_open());
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_panicking_sink_reports_panic() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout().returning(|buf, _| {
            buf[..3].copy_from_slice(b"x\r\n");
            Ok(3)
        });

        let sink = |line: String| assert!(line.is_empty(), "sink failure");
        let mut reader = SerialReader::with_config(Box::new(conn), sink, fast_config());
        reader.start().unwrap();
        assert!(matches!(reader.join(), Err(ReaderError::Panicked)));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_drop_after_sink_panic_does_not_propagate() {
        let mut conn = MockConnection::new();
        conn.expect_is_open().return_const(true);
        conn.expect_describe().return_const("mock".to_string());
        conn.expect_read_timeout().returning(|buf, _| {
            buf[..3].copy_from_slice(b"x\r\n");
            Ok(3)
        });

        let sink = |line: String| assert!(line.is_empty(), "sink failure");
        let mut reader = SerialReader::with_config(Box::new(conn), sink, fast_config());
        reader.start().unwrap();
        let handle = reader.handle();

        drop(reader);
        assert_eq!(handle.state(), ReaderState::Stopped);
    }
}
