// SPDX-License-Identifier: Apache-2.0

//! The event variants dequeued by a component's worker loop.

use crate::message::Message;
use serde_json::Value;

/// One unit of work dequeued from a component's input queue.
pub enum Event {
    /// A message flowing through the pipeline.
    Message(Message),
    /// A timer registered via [`crate::timer::TimerManager`] fired.
    Timer {
        /// The identifier returned when the timer was registered.
        timer_id: u64,
        /// The payload bound to the timer at registration time.
        payload: Value,
    },
    /// A cache entry registered via [`crate::cache::CacheService`] expired.
    CacheExpiry {
        /// The cache key that expired.
        key: String,
        /// Metadata bound to the entry at insertion time.
        metadata: Value,
        /// The data that was stored under `key`.
        expired_data: Value,
    },
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Message(_) => f.debug_struct("Message").finish_non_exhaustive(),
            Event::Timer { timer_id, .. } => {
                f.debug_struct("Timer").field("timer_id", timer_id).finish_non_exhaustive()
            }
            Event::CacheExpiry { key, .. } => {
                f.debug_struct("CacheExpiry").field("key", key).finish_non_exhaustive()
            }
        }
    }
}
