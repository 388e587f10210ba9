//! Concrete collaborators for the courier: byte transports, codecs and port discovery

pub mod codec;
pub mod ports;
pub mod transport;
