/// Core courier traits - the collaborators the polling loop talks to
///
/// The loop itself knows nothing about serial ports or protocol encodings. It drives a
/// [`Transport`] for byte I/O, a [`Codec`] for framing, and fans the decoded result out to
/// [`Listener`]s.
use anyhow::Result;
use std::{sync::Arc, time::Duration};

use super::{
    error::{ParseError, TransportError},
    event::CourierEvent,
};

/// Protocol logic: builds outbound command frames and decodes response frames
///
/// Only ever called from the courier thread, one call at a time.
pub trait Codec: Send + 'static {
    /// Decoded response type handed to listeners
    type Event: Send + Sync + 'static;

    /// Build the next command frame to send to the slave
    fn next_command(&mut self) -> Vec<u8>;

    /// Largest response frame the slave may send back
    fn max_response_size(&self) -> usize;

    /// Decode a raw response frame
    fn parse_response(&mut self, raw: &[u8]) -> Result<Self::Event, ParseError>;
}

/// Blocking byte I/O with a read timeout
///
/// Implementations must distinguish timeouts from hard I/O failures and should hand out a
/// [`TransportCloser`] so that a blocked read can be cut short from another thread.
pub trait Transport: Send {
    /// Write a full command frame
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max` bytes, waiting at most `timeout` for them
    ///
    /// Returns whatever arrived once `max` bytes are in or the line goes quiet. Returns
    /// [`TransportError::Timeout`] when nothing arrived at all.
    fn read_up_to(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Read timeout used by the courier for every response
    fn timeout(&self) -> Duration;

    /// Handle that can close this transport from any thread
    fn closer(&self) -> Option<Arc<dyn TransportCloser>> {
        None
    }
}

/// Cross-thread close signal for a [`Transport`]
///
/// After `close` returns, pending and future reads and writes on the transport fail with
/// [`TransportError::Closed`] promptly instead of waiting out their timeout.
pub trait TransportCloser: Send + Sync {
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Observer of decoded courier events
///
/// Called in-line on the courier thread, so a slow listener delays the next poll. Errors
/// (and panics) are logged by the registry and never reach other listeners or the loop.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &CourierEvent<E>) -> Result<()>;
}

/// Listener that does nothing (useful for testing)
pub struct NoOpListener;

impl<E> Listener<E> for NoOpListener {
    fn on_event(&self, _event: &CourierEvent<E>) -> Result<()> {
        Ok(())
    }
}

/// Listener that logs every event at info level
pub struct LoggingListener;

impl<E: std::fmt::Debug> Listener<E> for LoggingListener {
    fn on_event(&self, event: &CourierEvent<E>) -> Result<()> {
        log::info!(
            "Courier event: cycle={}, at={}, payload={:?}",
            event.cycle(),
            event.received_at().format("%H:%M:%S%.3f"),
            event.payload()
        );
        Ok(())
    }
}
