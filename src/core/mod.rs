//! Core module containing the reader engine
//!
//! This module provides:
//! - Connection layer (serial port, scripted in-memory duplex)
//! - Line delimiters shared between host and reader
//! - Line framing with configurable decoding
//! - Line sinks (callbacks and channels)
//! - Outbound write queue
//! - The background reader-writer loop

pub mod connection;
pub mod delimiter;
pub mod framer;
pub mod reader;
pub mod sink;
pub mod write_queue;
