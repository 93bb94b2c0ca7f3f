// SPDX-License-Identifier: Apache-2.0

//! Errors for the channel crate.

/// Errors that can occur sending a value into a bounded channel.
#[derive(thiserror::Error, Debug)]
pub enum SendError<T> {
    /// The channel is closed; no receiver remains.
    #[error("channel is closed")]
    Closed(T),
    /// The deadline elapsed before a slot became available.
    #[error("send timed out")]
    Timeout(T),
}

impl<T> SendError<T> {
    /// Returns the value that could not be sent, regardless of which variant this is.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(v) | Self::Timeout(v) => v,
        }
    }
}

/// Errors that can occur receiving from a bounded channel with no timeout.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The channel is closed and drained.
    #[error("channel is closed")]
    Closed,
}

/// Errors that can occur receiving from a bounded channel with a deadline.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// The channel is closed and drained.
    #[error("channel is closed")]
    Closed,
    /// The deadline elapsed with nothing to receive.
    #[error("recv timed out")]
    Timeout,
}
