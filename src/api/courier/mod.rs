pub mod core;
pub mod error;
pub mod event;
pub mod master;
pub mod registry;
pub mod traits;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

pub use error::{CourierError, ParseError, TransportError};
pub use event::CourierEvent;
pub use registry::{DispatchReport, ListenerRegistry};
pub use traits::{Codec, Listener, LoggingListener, NoOpListener, Transport, TransportCloser};

pub use self::core::{CourierLoop, CycleOutcome};
pub use master::Courier;

// Channel-backed listener lives with the other flume-based handlers
pub use crate::cli::handlers::ChannelListener;

/// Lifecycle of a courier: `Created -> Running -> Stopped`, never backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum CourierState {
    /// Constructed, loop thread not started, no I/O performed yet
    Created = 0,
    /// Loop thread is cycling
    Running = 1,
    /// Terminal. Transport released, no further cycles
    Stopped = 2,
}

/// Counters collected by the courier loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourierStats {
    /// Cycles that reached the transport
    pub cycles: u64,
    /// Events fanned out to listeners
    pub dispatched: u64,
    pub timeouts: u64,
    pub io_faults: u64,
    pub parse_failures: u64,
    /// Listener calls that returned an error or panicked
    pub listener_failures: u64,
}
