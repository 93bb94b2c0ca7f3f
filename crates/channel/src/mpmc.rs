// SPDX-License-Identifier: Apache-2.0

//! Bounded multiple-producer, multiple-consumer channel.
//!
//! Used as a component group's shared input queue: every sibling instance of a component holds
//! a clone of the same [`Receiver`], so enqueued events are load-balanced across them with no
//! further coordination required.

use crate::error::{RecvTimeoutError, SendError};
use std::time::{Duration, Instant};

/// The sending half of a bounded mpmc channel.
#[derive(Clone)]
pub struct Sender<T> {
    inner: flume::Sender<T>,
}

/// The receiving half of a bounded mpmc channel. Cloning shares the same underlying queue, which
/// is how a component group's sibling instances cooperate as a worker pool.
#[derive(Clone)]
pub struct Receiver<T> {
    inner: flume::Receiver<T>,
}

/// Creates a bounded mpmc channel with the given capacity.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (Sender { inner: tx }, Receiver { inner: rx })
}

impl<T> Sender<T> {
    /// Sends `value`, blocking until a slot is free, the channel closes, or `timeout` elapses.
    ///
    /// A full input queue blocks the producer rather than dropping the event; bounding the block
    /// with a short timeout is what lets the producer re-check a stop signal between attempts.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendError<T>> {
        match self.inner.send_timeout(value, timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(v)) => Err(SendError::Timeout(v)),
            Err(flume::SendTimeoutError::Disconnected(v)) => Err(SendError::Closed(v)),
        }
    }

    /// Sends `value` without blocking; fails immediately if the queue is full or closed.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        match self.inner.try_send(value) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(v)) => Err(SendError::Timeout(v)),
            Err(flume::TrySendError::Disconnected(v)) => Err(SendError::Closed(v)),
        }
    }

    /// Number of sender handles still outstanding (including this one).
    #[must_use]
    pub fn sender_count(&self) -> usize {
        self.inner.sender_count()
    }
}

impl<T> Receiver<T> {
    /// Blocks for up to `timeout` waiting for the next value.
    ///
    /// Callers loop on this with a short timeout (the spec's "≤ 1s deadline") so the worker can
    /// re-check its stop signal between attempts rather than blocking indefinitely.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        match self.inner.recv_timeout(timeout) {
            Ok(v) => Ok(v),
            Err(flume::RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
            Err(flume::RecvTimeoutError::Disconnected) => Err(RecvTimeoutError::Closed),
        }
    }

    /// Current number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the queue currently holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drains all currently-buffered values without blocking. Used by `cleanup()` to release
    /// whatever a component's input queue was still holding at shutdown.
    pub fn drain(&self) -> Vec<T> {
        self.inner.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn send_recv_round_trip() {
        let (tx, rx) = bounded::<i32>(2);
        tx.send_timeout(1, Duration::from_millis(10)).unwrap();
        tx.send_timeout(2, Duration::from_millis(10)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 2);
    }

    #[test]
    fn send_blocks_when_full_then_times_out() {
        let (tx, _rx) = bounded::<i32>(1);
        tx.send_timeout(1, Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        let err = tx.send_timeout(2, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, SendError::Timeout(2)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn siblings_share_one_queue_and_load_balance() {
        let (tx, rx) = bounded::<i32>(10);
        for i in 0..6 {
            tx.send_timeout(i, Duration::from_millis(10)).unwrap();
        }
        let rx_a = rx.clone();
        let rx_b = rx.clone();
        let handle_a = thread::spawn(move || {
            let mut received = Vec::new();
            while let Ok(v) = rx_a.recv_timeout(Duration::from_millis(20)) {
                received.push(v);
            }
            received
        });
        let handle_b = thread::spawn(move || {
            let mut received = Vec::new();
            while let Ok(v) = rx_b.recv_timeout(Duration::from_millis(20)) {
                received.push(v);
            }
            received
        });
        let mut all = handle_a.join().unwrap();
        all.extend(handle_b.join().unwrap());
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn closed_channel_is_observed_by_receiver() {
        let (tx, rx) = bounded::<i32>(1);
        drop(tx);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
            RecvTimeoutError::Closed
        );
    }

    #[test]
    fn drain_empties_without_blocking() {
        let (tx, rx) = bounded::<i32>(4);
        tx.send_timeout(1, Duration::from_millis(10)).unwrap();
        tx.send_timeout(2, Duration::from_millis(10)).unwrap();
        assert_eq!(rx.drain(), vec![1, 2]);
        assert!(rx.is_empty());
    }
}
