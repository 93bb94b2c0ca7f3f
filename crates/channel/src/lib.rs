// SPDX-License-Identifier: Apache-2.0

//! Bounded, cross-thread channel implementations used for component input queues.
//!
//! Two shapes are provided:
//! - [`mpsc`]: single-producer, single-consumer, used for the request/response controller's
//!   reply-delivery path and other point-to-point plumbing.
//! - [`mpmc`]: multiple-producer, multiple-consumer, used as a component group's shared input
//!   queue (sibling instances of the same component pull from one queue).
//!
//! Both are thin wrappers over [`flume`] that add a bounded `send` with a deadline, so that
//! every blocking call in the runtime can honor the "≤ 1s so shutdown stays responsive" rule
//! without each call site re-deriving the polling loop.

pub mod error;
pub mod mpmc;
pub mod mpsc;

pub use error::{RecvError, RecvTimeoutError, SendError};
