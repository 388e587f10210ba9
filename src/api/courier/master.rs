use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    core::{CourierLoop, CourierShared},
    error::CourierError,
    traits::{Codec, Listener, Transport},
    CourierState, CourierStats,
};

/// Handle to a courier that polls a slave device on its own thread
///
/// The handle is `Sync`: `stop`, `is_comms_healthy` and the listener operations may be
/// called from any thread while the loop runs. A stopped courier cannot be restarted;
/// build a new one instead.
///
/// # Example
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
/// use ptalk::api::courier::{Courier, LoggingListener};
/// use ptalk::protocol::{codec::raw::RawFrameCodec, transport::serial::SerialTransport};
///
/// let transport = SerialTransport::open("/dev/ttyUSB0", 9600, Duration::from_millis(500))?;
/// let codec = RawFrameCodec::new(vec![0x02, 0x08, 0x10, 0x7F, 0x10, 0x00, 0x03], 11);
///
/// let courier = Courier::new(Box::new(transport), codec, 100)?;
/// let logger = Arc::new(LoggingListener);
/// courier.register(&logger);
/// courier.start()?;
///
/// // ... later, from any thread
/// courier.stop();
/// courier.join()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Courier<C: Codec> {
    shared: Arc<CourierShared<C::Event>>,
    interval: Duration,
    pending: Mutex<Option<CourierLoop<C>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Codec> Courier<C> {
    /// Create a courier polling every `poll_interval_ms` milliseconds (must be > 0)
    ///
    /// Nothing touches the transport until `start` is called.
    pub fn new(
        transport: Box<dyn Transport>,
        codec: C,
        poll_interval_ms: u64,
    ) -> Result<Self, CourierError> {
        Self::with_interval(transport, codec, Duration::from_millis(poll_interval_ms))
    }

    pub fn with_interval(
        transport: Box<dyn Transport>,
        codec: C,
        interval: Duration,
    ) -> Result<Self, CourierError> {
        let courier_loop = CourierLoop::new(transport, codec, interval)?;

        Ok(Self {
            shared: Arc::clone(courier_loop.shared()),
            interval,
            pending: Mutex::new(Some(courier_loop)),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the loop thread
    ///
    /// The state turns `Running` once the thread itself is up.
    pub fn start(&self) -> Result<(), CourierError> {
        if self.shared.is_stopping() {
            return Err(CourierError::Stopped);
        }
        let Some(courier_loop) = self.pending.lock().take() else {
            // A concurrent stop may have taken the pending loop first
            return Err(if self.shared.is_stopping() {
                CourierError::Stopped
            } else {
                CourierError::AlreadyStarted
            });
        };

        let spawned = thread::Builder::new()
            .name("ptalk-courier".to_string())
            .spawn(move || courier_loop.run());

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.request_stop();
                self.shared.set_state(CourierState::Stopped);
                Err(CourierError::Spawn(err))
            }
        }
    }

    /// Ask the loop to stop and release the transport
    ///
    /// Idempotent and non-blocking. A cycle already in flight finishes (a pending read
    /// is cut short by closing the transport), then no further cycle starts. Use
    /// [`join`](Self::join) to wait for the thread.
    pub fn stop(&self) {
        if self.shared.request_stop() {
            log::info!("Courier stop requested");
        }

        // Never started: drop the transport right here
        if let Some(courier_loop) = self.pending.lock().take() {
            drop(courier_loop);
            self.shared.set_state(CourierState::Stopped);
        }
    }

    /// Wait for the loop thread to exit
    pub fn join(&self) -> Result<(), CourierError> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| CourierError::LoopPanicked),
            None if self.state() == CourierState::Stopped => Ok(()),
            None => Err(CourierError::NotStarted),
        }
    }

    pub fn state(&self) -> CourierState {
        self.shared.state()
    }

    /// `false` once any timeout or I/O fault has been seen
    ///
    /// The courier never sets this back to `true` on its own; see
    /// [`clear_comms_fault`](Self::clear_comms_fault).
    pub fn is_comms_healthy(&self) -> bool {
        self.shared.is_comms_healthy()
    }

    /// Reset the health flag, e.g. after the caller has dealt with a fault
    pub fn clear_comms_fault(&self) {
        self.shared.clear_comms_fault();
    }

    pub fn stats(&self) -> CourierStats {
        self.shared.stats()
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    /// Subscribe a listener. The courier only keeps a weak reference to it.
    pub fn register<L>(&self, listener: &Arc<L>) -> bool
    where
        L: Listener<C::Event> + 'static,
    {
        self.shared.registry().register(listener)
    }

    pub fn register_dyn(&self, listener: &Arc<dyn Listener<C::Event>>) -> bool {
        self.shared.registry().register_dyn(listener)
    }

    pub fn unregister<L>(&self, listener: &Arc<L>) -> bool
    where
        L: Listener<C::Event> + ?Sized,
    {
        self.shared.registry().unregister(listener)
    }

    pub fn unregister_all(&self) {
        self.shared.registry().unregister_all();
    }
}

impl<C: Codec> Drop for Courier<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::courier::{error::ParseError, CourierEvent},
        protocol::transport::scripted::{Reply, ScriptedTransport},
    };
    use anyhow::Result;

    struct EchoCodec;

    impl Codec for EchoCodec {
        type Event = Vec<u8>;

        fn next_command(&mut self) -> Vec<u8> {
            vec![0x02]
        }

        fn max_response_size(&self) -> usize {
            8
        }

        fn parse_response(&mut self, raw: &[u8]) -> Result<Vec<u8>, ParseError> {
            Ok(raw.to_vec())
        }
    }

    struct Forward(flume::Sender<u64>);

    impl Listener<Vec<u8>> for Forward {
        fn on_event(&self, event: &CourierEvent<Vec<u8>>) -> Result<()> {
            let _ = self.0.send(event.cycle());
            Ok(())
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let (transport, script) = ScriptedTransport::new(Duration::from_millis(20));
        let courier = Courier::new(Box::new(transport), EchoCodec, 10).unwrap();
        assert_eq!(courier.state(), CourierState::Created);
        assert!(matches!(courier.join(), Err(CourierError::NotStarted)));

        let (tx, rx) = flume::unbounded();
        let forward = Arc::new(Forward(tx));
        courier.register(&forward);
        script.push(Reply::Bytes(vec![0x01, 0xFA]));

        courier.start().unwrap();
        assert!(matches!(courier.start(), Err(CourierError::AlreadyStarted)));

        // Delivery happens on the loop thread, so it is running by now
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(courier.state(), CourierState::Running);

        courier.stop();
        courier.stop();
        courier.join().unwrap();
        assert_eq!(courier.state(), CourierState::Stopped);
        assert!(matches!(courier.start(), Err(CourierError::Stopped)));
    }

    #[test]
    fn test_stop_before_start_releases_transport() {
        let (transport, script) = ScriptedTransport::new(Duration::from_millis(20));
        let courier = Courier::new(Box::new(transport), EchoCodec, 10).unwrap();

        courier.stop();

        assert_eq!(courier.state(), CourierState::Stopped);
        assert!(script.is_closed());
        assert!(script.is_released());
        assert!(matches!(courier.start(), Err(CourierError::Stopped)));
        assert!(courier.join().is_ok());
    }

    #[test]
    fn test_zero_interval_fails_fast() {
        let (transport, _script) = ScriptedTransport::new(Duration::from_millis(20));
        let result = Courier::new(Box::new(transport), EchoCodec, 0);
        assert!(matches!(result, Err(CourierError::ZeroInterval)));
    }
}
