use derive_more::{Display, Error};
use std::time::Duration;

/// Failure reported by a [`Transport`](super::Transport).
///
/// The courier classifies these into two fault classes: `Timeout` is a timeout fault,
/// `Io` and `Closed` are I/O faults. Both clear the comms health flag and neither stops
/// the loop.
#[derive(Debug, Display, Error)]
pub enum TransportError {
    /// No (or not enough) response bytes arrived within the read timeout
    #[display("no response within {_0:?}")]
    Timeout(#[error(not(source))] Duration),

    /// The command frame could not be written out within the given time
    #[display("command write timed out after {_0:?}")]
    WriteTimeout(#[error(not(source))] Duration),

    /// The underlying device failed (unplugged, port error, broken pipe, ...)
    #[display("transport I/O failure: {_0}")]
    Io(std::io::Error),

    /// The transport was closed, usually by `Courier::stop` from another thread
    #[display("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether this error is a timeout fault (as opposed to an I/O fault)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::WriteTimeout(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::Timeout(Duration::ZERO)
            }
            _ => TransportError::Io(err),
        }
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => TransportError::from(std::io::Error::new(
                kind,
                err.description,
            )),
            serialport::ErrorKind::NoDevice => TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                err.description,
            )),
            _ => TransportError::Io(std::io::Error::other(err.description)),
        }
    }
}

/// A codec could not decode a response frame into an event.
#[derive(Debug, Display, Error)]
pub enum ParseError {
    #[display("empty response")]
    Empty,

    #[display("response too short: got {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },

    #[display("malformed response: {_0}")]
    Malformed(#[error(not(source))] String),
}

/// Errors returned by the courier control surface.
///
/// Transport and parse failures never show up here; those stay inside the loop and are
/// only visible through the health flag and the stats counters.
#[derive(Debug, Display, Error)]
pub enum CourierError {
    #[display("poll interval must be greater than zero")]
    ZeroInterval,

    #[display("courier already started")]
    AlreadyStarted,

    #[display("courier has been stopped and cannot be restarted")]
    Stopped,

    #[display("courier has not been started")]
    NotStarted,

    #[display("failed to spawn courier thread: {_0}")]
    Spawn(std::io::Error),

    #[display("courier loop thread panicked")]
    LoopPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_maps_to_timeout_fault() {
        let err = TransportError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "operation timed out",
        ));
        assert!(err.is_timeout());

        let err = TransportError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "device gone",
        ));
        assert!(!err.is_timeout());
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_serialport_no_device_is_io_fault() {
        let err = TransportError::from(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "device unplugged",
        ));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(err.to_string().contains("device unplugged"));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(TransportError::Closed.to_string(), "transport closed");
        assert_eq!(
            TransportError::WriteTimeout(Duration::from_millis(500)).to_string(),
            "command write timed out after 500ms"
        );
        assert!(TransportError::WriteTimeout(Duration::ZERO).is_timeout());
        assert_eq!(
            ParseError::TooShort { got: 1, need: 2 }.to_string(),
            "response too short: got 1 bytes, need at least 2"
        );
        assert_eq!(
            CourierError::ZeroInterval.to_string(),
            "poll interval must be greater than zero"
        );
    }
}
