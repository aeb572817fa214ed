//! Connection layer consumed by the line reader
//!
//! Supports:
//! - Serial ports (RS-232, RS-485, USB-Serial) through the `serialport` crate
//! - A scripted in-memory duplex for tests and demos
//!
//! The reader never opens a connection. It receives one that is already open,
//! drives it from its own thread, and closes it once when its loop exits.

mod scripted;
mod serial;

pub use scripted::{ScriptedConnection, ScriptedHandle};
pub use serial::{list_ports, SerialConfig, SerialConnection, SerialFlowControl, SerialParity};

use std::time::Duration;
use thiserror::Error;

/// Connection error types
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Opening the port failed for another reason
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port name
        port: String,
        /// Underlying error message
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is closed
    #[error("Connection closed")]
    Closed,
}

/// An already-open duplex byte stream.
///
/// Implementations must return from [`Connection::read_timeout`] once data is
/// available or the timeout has elapsed, whichever comes first; the reader
/// relies on that bound for its stop latency.
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send {
    /// Wait up to `timeout` for inbound data and copy it into `buf`.
    ///
    /// `Ok(0)` means no data arrived within the bound.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ConnectionError>;

    /// Write one payload, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError>;

    /// Whether the connection is still open
    fn is_open(&self) -> bool;

    /// Close the connection. Closing twice is a no-op.
    fn close(&mut self);

    /// Human readable description (port name, settings)
    fn describe(&self) -> String;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("describe", &self.describe())
            .field("open", &self.is_open())
            .finish()
    }
}
