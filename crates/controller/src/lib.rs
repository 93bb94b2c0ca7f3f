// SPDX-License-Identifier: Apache-2.0

//! Flow assembly, app lifecycle, the request/response controller and its multi-session registry,
//! and the top-level [`Connector`] that ties every app together.
//!
//! Layering: [`conduit_engine`] knows how to drive a single component instance and nothing about
//! wiring several of them together; this crate is where that wiring happens. [`flow::build`]
//! turns a declared flow into a chain of running component groups sharing a flow-level
//! [`kv::KvStore`] and [`lock::LockManager`]; [`app::App`] owns one or more flows plus the
//! three-phase shutdown and restart lifecycle; [`Connector`] owns every configured app plus the
//! process-wide timer/cache services and the add/remove/status operations a management surface
//! calls into.

pub mod app;
pub mod app_hooks;
pub mod connector;
pub mod error;
pub mod flow;
pub mod kv;
pub mod lock;
pub mod request_response;
pub mod session;
pub mod subscription_router;

pub use app::App;
pub use connector::Connector;
pub use error::Error;
pub use flow::Flow;
pub use kv::KvStore;
pub use lock::LockManager;
pub use request_response::{BrokerRequestResponseController, RESPONSE_TOPIC_KEY, REPLY_METADATA_KEY};
pub use session::SessionRegistry;
