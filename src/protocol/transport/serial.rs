use anyhow::Result;
use serialport::{ClearBuffer, SerialPort};
use std::{
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::api::{
    courier::{Transport, TransportCloser, TransportError},
    utils::open_serial_port,
};

/// Reads are issued in slices of at most this long so a close is noticed promptly.
/// Once a response has started, a quiet slice of this length ends the frame.
const READ_SLICE: Duration = Duration::from_millis(20);

#[derive(Default)]
struct SerialCloser {
    closed: AtomicBool,
}

impl TransportCloser for SerialCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// [`Transport`] over a serial port (RS-232, ccTalk, USB CDC, ...)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    closer: Arc<SerialCloser>,
}

impl SerialTransport {
    /// Open `port_name` with exclusive access; `timeout` bounds every response read
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = open_serial_port(port_name, baud_rate, READ_SLICE.min(timeout))?;
        log::info!("Opened {port_name} at {baud_rate} baud (response timeout {timeout:?})");
        Ok(Self::from_port(port, timeout))
    }

    /// Wrap an already configured port
    pub fn from_port(port: Box<dyn SerialPort>, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            closer: Arc::new(SerialCloser::default()),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closer.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

fn write_failure(err: std::io::Error, timeout: Duration) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportError::WriteTimeout(timeout)
        }
        _ => TransportError::Io(err),
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;

        // Stale bytes from a late answer to an earlier poll would corrupt this response
        if let Err(err) = self.port.clear(ClearBuffer::Input) {
            log::debug!("Failed to clear serial input buffer: {err}");
        }

        let timeout = self.timeout;
        self.port.set_timeout(timeout)?;
        self.port
            .write_all(frame)
            .and_then(|()| self.port.flush())
            .map_err(|err| write_failure(err, timeout))
    }

    fn read_up_to(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buffer = vec![0u8; max];
        let mut total = 0;

        while total < max {
            self.ensure_open()?;

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.port.set_timeout(READ_SLICE.min(deadline - now))?;

            match self.port.read(&mut buffer[total..]) {
                Ok(0) => {}
                Ok(n) => total += n,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    if total > 0 {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        if total == 0 {
            return Err(TransportError::Timeout(timeout));
        }
        buffer.truncate(total);
        Ok(buffer)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn closer(&self) -> Option<Arc<dyn TransportCloser>> {
        Some(self.closer.clone() as Arc<dyn TransportCloser>)
    }
}
