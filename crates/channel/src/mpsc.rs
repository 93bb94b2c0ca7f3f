// SPDX-License-Identifier: Apache-2.0

//! Bounded single-producer-shape, single-consumer channel.
//!
//! The sender can be cloned (multiple components may push replies), but the receiver cannot —
//! this is the shape of the request/response controller's reply queue, which is read by exactly
//! one reader thread.

use crate::error::{RecvTimeoutError, SendError};
use std::time::Duration;

/// The sending half. Cloneable: many producers may feed one reader.
#[derive(Clone)]
pub struct Sender<T> {
    inner: flume::Sender<T>,
}

/// The receiving half. Not cloneable, by design: exactly one reader drains this queue.
pub struct Receiver<T> {
    inner: flume::Receiver<T>,
}

/// Creates a bounded single-consumer channel with the given capacity.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (Sender { inner: tx }, Receiver { inner: rx })
}

impl<T> Sender<T> {
    /// Sends `value`, blocking until a slot is free, the channel closes, or `timeout` elapses.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendError<T>> {
        match self.inner.send_timeout(value, timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(v)) => Err(SendError::Timeout(v)),
            Err(flume::SendTimeoutError::Disconnected(v)) => Err(SendError::Closed(v)),
        }
    }
}

impl<T> Receiver<T> {
    /// Blocks for up to `timeout` waiting for the next value.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        match self.inner.recv_timeout(timeout) {
            Ok(v) => Ok(v),
            Err(flume::RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
            Err(flume::RecvTimeoutError::Disconnected) => Err(RecvTimeoutError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_producers_one_reader() {
        let (tx, rx) = bounded::<i32>(4);
        let tx2 = tx.clone();
        tx.send_timeout(1, Duration::from_millis(10)).unwrap();
        tx2.send_timeout(2, Duration::from_millis(10)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 2);
    }

    #[test]
    fn recv_times_out_when_empty() {
        let (_tx, rx) = bounded::<i32>(1);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
            RecvTimeoutError::Timeout
        );
    }
}
