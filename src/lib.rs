//! ptalk: polling engine for half-duplex master/slave serial protocols
//!
//! A [`Courier`](api::courier::Courier) sends a command frame to a slave device (a ccTalk
//! coin acceptor, an RS-232 bill validator, ...), waits a bounded time for the response,
//! decodes it through a [`Codec`](api::courier::Codec) and hands the result to every
//! registered [`Listener`](api::courier::Listener), at a fixed cadence until stopped.
//! Transport faults never end the loop; they clear the comms health flag instead.
//!
//! The core lives in [`api::courier`]. Concrete transports and a pass-through codec are
//! under [`protocol`]; the `ptalk` binary wiring is in the hidden `cli` and `boot`
//! modules.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod protocol;

pub use api::*;
