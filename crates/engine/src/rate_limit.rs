// SPDX-License-Identifier: Apache-2.0

//! The error-input component's rate limiter (§6, §7): bounds how many error records a flow's
//! error queue accepts per second so a component stuck in a fast failure loop can't flood it.
//! Excess records are dropped with a warning rather than applying backpressure to the worker
//! that is already recovering from a failure.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A fixed-window counter: at most `max_per_second` admissions in any one-second window,
/// starting from the first admission attempt in that window.
pub struct ErrorRateLimiter {
    max_per_second: u32,
    window: Mutex<Window>,
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl ErrorRateLimiter {
    /// Builds a limiter admitting up to `max_per_second` calls to [`Self::try_admit`] in any
    /// rolling one-second window.
    #[must_use]
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window: Mutex::new(Window { started_at: Instant::now(), count: 0 }),
        }
    }

    /// `true` if this call falls within the current window's budget, `false` if it should be
    /// dropped. A limiter configured with `0` never admits anything.
    pub fn try_admit(&self) -> bool {
        if self.max_per_second == 0 {
            return false;
        }
        let mut window = self.window.lock();
        if window.started_at.elapsed() >= Duration::from_secs(1) {
            window.started_at = Instant::now();
            window.count = 0;
        }
        if window.count >= self.max_per_second {
            return false;
        }
        window.count += 1;
        true
    }
}
