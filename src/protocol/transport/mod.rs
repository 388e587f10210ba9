pub mod scripted;
pub mod serial;

pub use scripted::{Reply, ScriptHandle, ScriptedTransport};
pub use serial::SerialTransport;
