/// Courier loop logic - one poll cycle at a time, no threads involved
///
/// `CourierLoop` owns the transport and codec and knows how to run a single
/// command/response/dispatch cycle. The execution harness (`Courier`) moves it onto a
/// dedicated thread and calls `run`; tests can drive `run_one_cycle` directly.
use parking_lot::Mutex;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    error::{CourierError, TransportError},
    event::CourierEvent,
    registry::{DispatchReport, ListenerRegistry},
    traits::{Codec, Transport, TransportCloser},
    CourierState, CourierStats,
};

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A response was decoded and fanned out
    Dispatched(DispatchReport),
    /// No response within the transport timeout
    Timeout,
    /// The transport failed or was closed
    IoFault,
    /// The response bytes could not be decoded; nothing was dispatched
    ParseFailure,
    /// The stop flag was already set, no I/O was attempted
    Skipped,
}

#[derive(Default)]
struct StatsCounters {
    cycles: AtomicU64,
    dispatched: AtomicU64,
    timeouts: AtomicU64,
    io_faults: AtomicU64,
    parse_failures: AtomicU64,
    listener_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> CourierStats {
        CourierStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            io_faults: self.io_faults.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the loop thread and the handle
pub(crate) struct CourierShared<E> {
    stop: AtomicBool,
    healthy: AtomicBool,
    state: AtomicU8,
    registry: ListenerRegistry<E>,
    stats: StatsCounters,
    closer: Mutex<Option<Arc<dyn TransportCloser>>>,
    wake_tx: flume::Sender<()>,
}

impl<E: 'static> CourierShared<E> {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn is_comms_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_comms_fault(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub(crate) fn registry(&self) -> &ListenerRegistry<E> {
        &self.registry
    }

    pub(crate) fn stats(&self) -> CourierStats {
        self.stats.snapshot()
    }

    pub(crate) fn state(&self) -> CourierState {
        CourierState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(CourierState::Stopped)
    }

    pub(crate) fn set_state(&self, state: CourierState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    /// `Created` -> `Running`; leaves a courier that already stopped alone
    fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            CourierState::Created.into(),
            CourierState::Running.into(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Raise the stop flag, close the transport and wake a sleeping loop.
    ///
    /// Returns `false` if a stop had already been requested.
    pub(crate) fn request_stop(&self) -> bool {
        if self.stop.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(closer) = self.closer.lock().take() {
            closer.close();
        }
        let _ = self.wake_tx.try_send(());
        true
    }
}

/// Marks the courier stopped when the loop exits. A loop that dies by unwinding also
/// drops the health flag, since no further cycle will ever run.
struct StoppedOnExit<'a, E: 'static>(&'a CourierShared<E>);

impl<E: 'static> Drop for StoppedOnExit<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.healthy.store(false, Ordering::SeqCst);
            log::error!("Courier loop panicked, comms marked unhealthy");
        }
        self.0.stop.store(true, Ordering::SeqCst);
        self.0.set_state(CourierState::Stopped);
    }
}

/// Run a codec callback; a panic is logged and turned into `None`
fn guard_codec<T>(cycle: u64, step: &str, call: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(_) => {
            log::error!("Cycle {cycle}: codec panicked in {step}");
            None
        }
    }
}

/// The polling loop: command, write, read, parse, dispatch, sleep
pub struct CourierLoop<C: Codec> {
    transport: Option<Box<dyn Transport>>,
    codec: C,
    interval: Duration,
    shared: Arc<CourierShared<C::Event>>,
    wake_rx: flume::Receiver<()>,
    cycle: u64,
}

impl<C: Codec> CourierLoop<C> {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: C,
        interval: Duration,
    ) -> Result<Self, CourierError> {
        if interval.is_zero() {
            return Err(CourierError::ZeroInterval);
        }

        let (wake_tx, wake_rx) = flume::bounded(1);
        let shared = Arc::new(CourierShared {
            stop: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            state: AtomicU8::new(CourierState::Created.into()),
            registry: ListenerRegistry::new(),
            stats: StatsCounters::default(),
            closer: Mutex::new(transport.closer()),
            wake_tx,
        });

        Ok(Self {
            transport: Some(transport),
            codec,
            interval,
            shared,
            wake_rx,
            cycle: 0,
        })
    }

    pub(crate) fn shared(&self) -> &Arc<CourierShared<C::Event>> {
        &self.shared
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn registry(&self) -> &ListenerRegistry<C::Event> {
        self.shared.registry()
    }

    pub fn is_comms_healthy(&self) -> bool {
        self.shared.is_comms_healthy()
    }

    pub fn stats(&self) -> CourierStats {
        self.shared.stats()
    }

    /// Raise the stop flag; the next `run_one_cycle` does no I/O
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Run one command/response exchange and dispatch the result
    pub fn run_one_cycle(&mut self) -> CycleOutcome {
        if self.shared.is_stopping() || self.transport.is_none() {
            return CycleOutcome::Skipped;
        }

        self.cycle += 1;
        let cycle = self.cycle;
        self.shared.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let codec = &mut self.codec;
        let Some((command, max_response)) = guard_codec(cycle, "next_command", || {
            (codec.next_command(), codec.max_response_size())
        }) else {
            return self.record_parse_failure();
        };
        log::trace!("Cycle {cycle}: sending {command:02X?}");

        let Some(transport) = self.transport.as_mut() else {
            return CycleOutcome::Skipped;
        };

        let exchange = match transport.write(&command) {
            // A stop may land between the write and the read; don't start the read then
            Ok(()) if self.shared.is_stopping() => Err(TransportError::Closed),
            Ok(()) => {
                let timeout = transport.timeout();
                transport.read_up_to(max_response, timeout)
            }
            Err(err) => Err(err),
        };

        let raw = match exchange {
            Ok(raw) => raw,
            Err(err) => return self.record_transport_fault(cycle, err),
        };
        log::trace!("Cycle {cycle}: received {raw:02X?}");

        let codec = &mut self.codec;
        let payload = match guard_codec(cycle, "parse_response", || codec.parse_response(&raw)) {
            Some(Ok(payload)) => payload,
            Some(Err(err)) => {
                log::warn!(
                    "Cycle {cycle}: failed to decode {} byte response: {err}",
                    raw.len()
                );
                return self.record_parse_failure();
            }
            None => return self.record_parse_failure(),
        };

        let event = CourierEvent::new(cycle, payload);
        let report = self.shared.registry.dispatch(&event);

        self.shared.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        if report.failed > 0 {
            self.shared
                .stats
                .listener_failures
                .fetch_add(report.failed as u64, Ordering::Relaxed);
        }

        CycleOutcome::Dispatched(report)
    }

    fn record_parse_failure(&self) -> CycleOutcome {
        self.shared
            .stats
            .parse_failures
            .fetch_add(1, Ordering::Relaxed);
        CycleOutcome::ParseFailure
    }

    fn record_transport_fault(&self, cycle: u64, err: TransportError) -> CycleOutcome {
        let was_healthy = self.shared.healthy.swap(false, Ordering::SeqCst);

        let outcome = if err.is_timeout() {
            self.shared.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            log::warn!("Cycle {cycle}: {err}");
            CycleOutcome::Timeout
        } else {
            self.shared.stats.io_faults.fetch_add(1, Ordering::Relaxed);
            if self.shared.is_stopping() {
                log::debug!("Cycle {cycle}: transport released during stop: {err}");
            } else {
                log::error!("Cycle {cycle}: {err}");
            }
            CycleOutcome::IoFault
        };

        if was_healthy {
            log::warn!("Comms health lost at cycle {cycle}");
        }
        outcome
    }

    /// Wait out the poll interval, returning early when a stop is requested
    fn pause(&self) {
        match self.wake_rx.recv_timeout(self.interval) {
            Err(flume::RecvTimeoutError::Timeout) => {}
            Ok(()) => log::debug!("Courier sleep interrupted, checking stop flag"),
            Err(flume::RecvTimeoutError::Disconnected) => {
                log::debug!("Courier wake channel closed, falling back to plain sleep");
                std::thread::sleep(self.interval);
            }
        }
    }

    /// Cycle until the stop flag is raised, then release the transport
    pub fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let _exit = StoppedOnExit(&shared);
        shared.mark_running();

        log::info!("Courier loop started, polling every {:?}", self.interval);

        while !shared.is_stopping() {
            self.run_one_cycle();
            self.pause();
        }

        self.transport = None;
        log::info!(
            "Courier loop stopped after {} cycles (comms healthy: {})",
            self.cycle,
            shared.is_comms_healthy()
        );
    }
}
