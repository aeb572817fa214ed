//! Line delivery
//!
//! Lines are delivered on the reader thread, one call per line, in stream
//! order. A sink must return quickly; anything slow belongs on the receiving
//! side of a channel.

/// Receiver of framed lines
pub trait LineSink: Send + 'static {
    /// Deliver one non-empty line
    fn deliver(&mut self, line: String);
}

impl<F> LineSink for F
where
    F: FnMut(String) + Send + 'static,
{
    fn deliver(&mut self, line: String) {
        self(line);
    }
}

/// Sink forwarding lines into a crossbeam channel.
///
/// Lines sent after the receiver is dropped are discarded.
pub fn channel_sink(tx: crossbeam_channel::Sender<String>) -> impl LineSink {
    move |line: String| {
        if tx.send(line).is_err() {
            tracing::trace!("Line receiver dropped; discarding line");
        }
    }
}

/// Sink forwarding lines into a tokio runtime
pub fn async_sink(tx: tokio::sync::mpsc::UnboundedSender<String>) -> impl LineSink {
    move |line: String| {
        if tx.send(line).is_err() {
            tracing::trace!("Async line receiver dropped; discarding line");
        }
    }
}
