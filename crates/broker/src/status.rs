// SPDX-License-Identifier: Apache-2.0

//! Reconnect strategy and retry bookkeeping for a broker adapter's status machine (§4.3).
//!
//! Both retry strategies described in the spec share one counter representation, per the
//! resolved open question on retry-counter uniformity: only whether the limit is bounded differs.

use std::time::Duration;

/// How a broker adapter retries a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// Retry indefinitely, waiting `interval` between attempts.
    Forever {
        /// Delay between reconnect attempts.
        interval: Duration,
    },
    /// Retry up to `count` times, waiting `interval` between attempts, then give up.
    Parametrized {
        /// Maximum number of attempts before the adapter gives up and stays `Disconnected`.
        count: u32,
        /// Delay between reconnect attempts.
        interval: Duration,
    },
}

impl ReconnectStrategy {
    /// The delay to wait between attempts under this strategy.
    #[must_use]
    pub fn interval(&self) -> Duration {
        match self {
            ReconnectStrategy::Forever { interval } | ReconnectStrategy::Parametrized { interval, .. } => *interval,
        }
    }
}

/// A single reconnect attempt counter, shared in representation by both strategies.
///
/// `limit` is `None` for [`ReconnectStrategy::Forever`] and `Some(count)` for
/// [`ReconnectStrategy::Parametrized`]; `attempt` decrements identically either way.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    attempt: u32,
    limit: Option<u32>,
}

impl RetryState {
    /// Builds a fresh retry counter for the given strategy.
    #[must_use]
    pub fn from_strategy(strategy: &ReconnectStrategy) -> Self {
        let limit = match strategy {
            ReconnectStrategy::Forever { .. } => None,
            ReconnectStrategy::Parametrized { count, .. } => Some(*count),
        };
        Self { attempt: 0, limit }
    }

    /// Records one more attempt, returning whether the adapter should try again (`true`) or give
    /// up (`false`, only possible when `limit` is bounded and exhausted).
    pub fn record_attempt(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        match self.limit {
            None => true,
            Some(limit) => self.attempt <= limit,
        }
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Remaining attempts, or `None` if unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_strategy_never_exhausts() {
        let strategy = ReconnectStrategy::Forever {
            interval: Duration::from_millis(100),
        };
        let mut state = RetryState::from_strategy(&strategy);
        for _ in 0..1000 {
            assert!(state.record_attempt());
        }
        assert_eq!(state.remaining(), None);
    }

    #[test]
    fn parametrized_strategy_exhausts_after_count() {
        let strategy = ReconnectStrategy::Parametrized {
            count: 3,
            interval: Duration::from_millis(10),
        };
        let mut state = RetryState::from_strategy(&strategy);
        assert!(state.record_attempt());
        assert!(state.record_attempt());
        assert!(state.record_attempt());
        assert!(!state.record_attempt());
        assert_eq!(state.remaining(), Some(0));
    }

    #[test]
    fn both_strategies_decrement_identically() {
        let forever = RetryState::from_strategy(&ReconnectStrategy::Forever {
            interval: Duration::from_secs(1),
        });
        let parametrized = RetryState::from_strategy(&ReconnectStrategy::Parametrized {
            count: 5,
            interval: Duration::from_secs(1),
        });
        assert_eq!(forever.attempt(), parametrized.attempt());
    }
}
