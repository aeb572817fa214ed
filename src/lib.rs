//! # Serline Core Library
//!
//! A background serial-port engine that turns a duplex byte stream into a
//! stream of text lines:
//! - Owns an already-open connection on a dedicated thread
//! - Drains an outbound write queue in FIFO order
//! - Splits inbound bytes on a delimiter that can change at runtime
//! - Delivers every non-empty line to a callback or channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use serline_core::{Delimiter, ReaderConfig, SerialConfig, SerialConnection, SerialReader};
//!
//! fn main() -> anyhow::Result<()> {
//!     let connection = SerialConnection::open(&SerialConfig::new("COM3", 115200))?;
//!     let mut reader = SerialReader::with_config(
//!         Box::new(connection),
//!         |line: String| println!("Received: {line}"),
//!         ReaderConfig::default(),
//!     );
//!     reader.start()?;
//!
//!     reader.enqueue_write(&b"AT\r\n"[..]);
//!     reader.set_delimiter(Delimiter::Lf);
//!
//!     reader.stop();
//!     reader.join()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{AppConfig, ConfigError, LoggingConfig};
pub use crate::core::connection::{
    list_ports, Connection, ConnectionError, ScriptedConnection, ScriptedHandle, SerialConfig,
    SerialConnection, SerialFlowControl, SerialParity,
};
pub use crate::core::delimiter::{Delimiter, DelimiterCell};
pub use crate::core::framer::{DecodeMode, LineFramer, ScanSummary};
pub use crate::core::reader::{
    ReaderConfig, ReaderError, ReaderHandle, ReaderState, ReaderStats, SerialReader,
};
pub use crate::core::sink::{async_sink, channel_sink, LineSink};
pub use crate::core::write_queue::WriteQueue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
