use chrono::{DateTime, Local};
use std::ops::Deref;

/// A decoded response as delivered to listeners.
///
/// Wraps the codec-defined payload with the cycle it was produced in and the time the
/// response was parsed. Listeners only ever see it through a shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CourierEvent<E> {
    cycle: u64,
    received_at: DateTime<Local>,
    payload: E,
}

impl<E> CourierEvent<E> {
    pub fn new(cycle: u64, payload: E) -> Self {
        Self {
            cycle,
            received_at: Local::now(),
            payload,
        }
    }

    /// Cycle number (starting at 1) in which the response arrived
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E> Deref for CourierEvent<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.payload
    }
}
