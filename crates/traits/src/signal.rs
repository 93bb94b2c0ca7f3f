// SPDX-License-Identifier: Apache-2.0

//! The combined stop signal: every component observes the logical OR of a connector-wide and an
//! app-local event. Only the app-local half can be cleared, which is what makes `App::start`
//! after `App::stop` possible without restarting the whole connector.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single settable/clearable/waitable event.
///
/// `wait` always returns the current state immediately if already set, otherwise blocks up to
/// the given timeout and returns whatever the state is by then.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Creates a new, unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Sets the signal and wakes every waiter.
    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        *state = true;
        cvar.notify_all();
    }

    /// Clears the signal.
    pub fn clear(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock() = false;
    }

    /// Returns whether the signal is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock()
    }

    /// Blocks until set or `timeout` elapses, returning the state observed at wake time.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        if *state {
            return true;
        }
        let deadline = Instant::now() + timeout;
        while !*state {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let result = cvar.wait_for(&mut state, remaining);
            if result.timed_out() {
                break;
            }
        }
        *state
    }
}

/// Two-channel stop signal whose `is_set()` is the OR of a connector-wide and an app-local half.
///
/// Components only ever see this combined view; the app lifecycle manager holds the app-local
/// half directly so it can clear it on restart.
#[derive(Clone)]
pub struct CombinedStopSignal {
    /// Shared across every app in the connector; set on full connector shutdown.
    pub connector_wide: StopSignal,
    /// Owned by a single app; set on that app's `stop()`, cleared on `start()`.
    pub app_local: StopSignal,
}

impl CombinedStopSignal {
    /// Builds a combined signal from the two halves.
    #[must_use]
    pub fn new(connector_wide: StopSignal, app_local: StopSignal) -> Self {
        Self {
            connector_wide,
            app_local,
        }
    }

    /// True if either half is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.connector_wide.is_set() || self.app_local.is_set()
    }

    /// Blocks up to `timeout`, waking early if either half is set. The short poll interval keeps
    /// this responsive to whichever half fires without requiring a shared condvar between them.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(20).min(timeout);
        loop {
            if self.is_set() {
                return true;
            }
            if Instant::now() >= deadline {
                return self.is_set();
            }
            std::thread::sleep(poll);
        }
    }
}
