// SPDX-License-Identifier: Apache-2.0

//! The component runtime: message/event model, expression and template engines, transforms,
//! timers, cache, and the worker loop that drives one component instance per OS thread.
//!
//! This crate is deliberately synchronous. Every blocking call a worker makes — dequeuing an
//! event, waiting on a timer, waiting on cache expiry, forwarding to the next component — takes an
//! explicit timeout so that a combined stop signal is observed within a bounded delay rather than
//! a thread blocking forever. `conduit-controller` builds on top of this crate to wire components
//! into flows and flows into apps; this crate knows nothing about either.

pub mod builtins;
pub mod cache;
pub mod component;
pub mod config_value;
pub mod error;
pub mod event;
pub mod expression;
pub mod factory;
pub mod message;
pub mod rate_limit;
pub mod request_response;
pub mod template;
pub mod timer;
pub mod transforms;
pub mod value;

pub use cache::CacheService;
pub use component::{Component, ComponentCounters, ComponentHandle, ComponentRuntimeConfig};
pub use config_value::{ConfigValue, InvokeFn, InvokeRegistry};
pub use error::{ComponentError, ComponentErrorKind, Error, ExprError};
pub use event::Event;
pub use expression::{Cast, Expression, Scratch};
pub use factory::{lookup as lookup_factory, ComponentFactory, COMPONENT_FACTORIES};
pub use message::{AckCallback, Message, NackCallback};
pub use rate_limit::ErrorRateLimiter;
pub use request_response::{RequestOptions, RequestResponseClient, ResponseChunk, ResponseReceiver};
pub use timer::{TimerId, TimerManager};
pub use transforms::Transform;
