//! In-memory transport driven by a reply script
//!
//! Used to simulate a slave device without hardware: every read pops the next scripted
//! reply, every written frame is recorded. With nothing scripted a read blocks until its
//! timeout, or until the transport is closed from another thread.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::api::courier::{Transport, TransportCloser, TransportError};

/// Granularity at which a blocked read notices a close
const CLOSE_POLL_SLICE: Duration = Duration::from_millis(5);

/// One scripted answer to a read
#[derive(Debug, Clone)]
pub enum Reply {
    /// Response bytes (truncated to the requested size)
    Bytes(Vec<u8>),
    /// Report a timeout straight away instead of waiting it out
    TimedOut,
    /// Report a hard I/O failure of the given kind
    Fault(std::io::ErrorKind),
}

#[derive(Default)]
struct ScriptedCloser {
    closed: AtomicBool,
}

impl TransportCloser for ScriptedCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    replies: flume::Receiver<Reply>,
    written: flume::Sender<Vec<u8>>,
    timeout: Duration,
    closer: Arc<ScriptedCloser>,
}

/// Test-side end of a [`ScriptedTransport`]
pub struct ScriptHandle {
    replies: flume::Sender<Reply>,
    written: flume::Receiver<Vec<u8>>,
    closer: Arc<ScriptedCloser>,
}

impl ScriptedTransport {
    pub fn new(timeout: Duration) -> (Self, ScriptHandle) {
        let (reply_tx, reply_rx) = flume::unbounded();
        let (written_tx, written_rx) = flume::unbounded();
        let closer = Arc::new(ScriptedCloser::default());

        let transport = Self {
            replies: reply_rx,
            written: written_tx,
            timeout,
            closer: Arc::clone(&closer),
        };
        let handle = ScriptHandle {
            replies: reply_tx,
            written: written_rx,
            closer,
        };
        (transport, handle)
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closer.is_closed() {
            return Err(TransportError::Closed);
        }
        let _ = self.written.send(frame.to_vec());
        Ok(())
    }

    fn read_up_to(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.closer.is_closed() {
                return Err(TransportError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout(timeout));
            }

            match self
                .replies
                .recv_timeout(CLOSE_POLL_SLICE.min(deadline - now))
            {
                Ok(Reply::Bytes(mut bytes)) => {
                    bytes.truncate(max);
                    return Ok(bytes);
                }
                Ok(Reply::TimedOut) => return Err(TransportError::Timeout(timeout)),
                Ok(Reply::Fault(kind)) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        kind,
                        "scripted transport fault",
                    )))
                }
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "script handle dropped",
                    )))
                }
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn closer(&self) -> Option<Arc<dyn TransportCloser>> {
        Some(self.closer.clone() as Arc<dyn TransportCloser>)
    }
}

impl ScriptHandle {
    /// Queue the answer for a future read
    pub fn push(&self, reply: Reply) {
        let _ = self.replies.send(reply);
    }

    /// Frames written so far (drained)
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.drain().collect()
    }

    /// Wait for the next written frame
    pub fn next_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.written.recv_timeout(timeout).ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Whether the transport itself has been dropped
    pub fn is_released(&self) -> bool {
        self.written.is_disconnected()
    }
}
