// SPDX-License-Identifier: Apache-2.0

//! The process-wide timer scheduler (§4.8): a min-heap of pending timers serviced by a single
//! dispatcher thread, producing [`crate::event::Event::Timer`] events into owning components'
//! input queues.

use crate::event::Event;
use conduit_channel::mpmc::Sender;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Identifies a registered timer, returned from [`TimerManager::add_timer`] and used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct ScheduledTimer {
    id: TimerId,
    expiry: Instant,
    interval: Option<Duration>,
    payload: Value,
    destination: Sender<Event>,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.id == other.id
    }
}
impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; reverse so the earliest expiry sorts to the top.
        other.expiry.cmp(&self.expiry)
    }
}

struct Heap {
    timers: BinaryHeap<ScheduledTimer>,
}

/// Process-wide min-heap timer scheduler.
///
/// One dispatcher thread waits on a condition variable with a deadline equal to the heap's
/// nearest expiry. On wake it pops every due timer, enqueues a `Timer` event on each one's
/// owning component input queue, and re-pushes interval timers with `expiry += interval`.
pub struct TimerManager {
    heap: Arc<(Mutex<Heap>, Condvar)>,
    next_id: AtomicU64,
    stopped: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    /// Builds a new manager and starts its dispatcher thread.
    #[must_use]
    pub fn new() -> Self {
        let heap = Arc::new((
            Mutex::new(Heap {
                timers: BinaryHeap::new(),
            }),
            Condvar::new(),
        ));
        let stopped = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let heap = heap.clone();
            let stopped = stopped.clone();
            std::thread::Builder::new()
                .name("conduit-timer-dispatcher".to_owned())
                .spawn(move || dispatch_loop(heap, stopped))
                .expect("failed to spawn timer dispatcher thread")
        };

        Self {
            heap,
            next_id: AtomicU64::new(1),
            stopped,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Registers a one-shot timer that fires `delay` from now.
    pub fn add_timer(&self, delay: Duration, payload: Value, destination: Sender<Event>) -> TimerId {
        self.schedule(delay, None, payload, destination)
    }

    /// Registers an interval timer that first fires `interval` from now, then re-fires every
    /// `interval` until cancelled.
    pub fn add_interval_timer(
        &self,
        interval: Duration,
        payload: Value,
        destination: Sender<Event>,
    ) -> TimerId {
        self.schedule(interval, Some(interval), payload, destination)
    }

    fn schedule(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        payload: Value,
        destination: Sender<Event>,
    ) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let expiry = Instant::now() + delay;
        let (lock, cvar) = &*self.heap;
        {
            let mut heap = lock.lock();
            heap.timers.push(ScheduledTimer {
                id,
                expiry,
                interval,
                payload,
                destination,
            });
        }
        cvar.notify_one();
        id
    }

    /// Cancels a pending timer. A no-op if it already fired (or never existed).
    pub fn cancel_timer(&self, id: TimerId) {
        let (lock, cvar) = &*self.heap;
        let mut heap = lock.lock();
        let remaining: BinaryHeap<ScheduledTimer> =
            heap.timers.drain().filter(|t| t.id != id).collect();
        heap.timers = remaining;
        drop(heap);
        cvar.notify_one();
    }

    /// Stops the dispatcher thread and joins it. Idempotent.
    pub fn shutdown(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        self.heap.1.notify_all();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(heap: Arc<(Mutex<Heap>, Condvar)>, stopped: Arc<AtomicBool>) {
    let (lock, cvar) = &*heap;
    loop {
        if stopped.load(AtomicOrdering::SeqCst) {
            return;
        }
        let mut guard = lock.lock();
        let now = Instant::now();

        let Some(next_expiry) = guard.timers.peek().map(|t| t.expiry) else {
            // Nothing scheduled; wait to be woken by a new registration or shutdown.
            let _ = cvar.wait_for(&mut guard, Duration::from_secs(1));
            continue;
        };

        if next_expiry > now {
            let _ = cvar.wait_for(&mut guard, next_expiry - now);
            continue;
        }

        let mut due = Vec::new();
        while let Some(top) = guard.timers.peek() {
            if top.expiry > Instant::now() {
                break;
            }
            due.push(guard.timers.pop().expect("peeked"));
        }
        for timer in due {
            let event = Event::Timer {
                timer_id: timer.id.0,
                payload: timer.payload.clone(),
            };
            // A full or closed destination queue is the owning component's problem, not the
            // dispatcher's: drop the tick rather than block the whole scheduler on one laggard.
            let _ = timer.destination.send_timeout(event, Duration::from_millis(100));
            if let Some(interval) = timer.interval {
                guard.timers.push(ScheduledTimer {
                    id: timer.id,
                    expiry: Instant::now() + interval,
                    interval: Some(interval),
                    payload: timer.payload,
                    destination: timer.destination,
                });
            }
        }
    }
}
