/// Flume-based listener that forwards courier events through a channel
///
/// Lets consumers pull events on their own thread instead of running code on the
/// courier thread.
use anyhow::Result;

use crate::api::courier::{CourierEvent, Listener};

pub struct ChannelListener<E> {
    sender: flume::Sender<CourierEvent<E>>,
}

impl<E> ChannelListener<E> {
    /// Create a listener with an unbounded channel
    pub fn new() -> (Self, flume::Receiver<CourierEvent<E>>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }

    /// Create a listener with a bounded channel
    ///
    /// A full channel blocks the courier thread until the consumer catches up.
    pub fn with_capacity(cap: usize) -> (Self, flume::Receiver<CourierEvent<E>>) {
        let (sender, receiver) = flume::bounded(cap);
        (Self { sender }, receiver)
    }
}

impl<E: Clone + Send + Sync> Listener<E> for ChannelListener<E> {
    fn on_event(&self, event: &CourierEvent<E>) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("Failed to forward event: receiver dropped"))
    }
}
