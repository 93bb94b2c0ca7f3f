// SPDX-License-Identifier: Apache-2.0

//! Logging setup and a Prometheus-backed metrics reporter for the connector runtime.
//!
//! Two independent concerns live here, mirroring the teacher's telemetry crate split:
//! - [`logging`]: a `tracing-subscriber` `fmt` layer plus `EnvFilter`, configured from the
//!   `log:` config section.
//! - [`metrics`]: a `prometheus`-backed [`metrics::MetricsReporter`], constructed once by the
//!   `Connector` and handed down by `Arc` to every app/flow/component rather than reached for as
//!   a process-wide singleton (see SPEC_FULL.md's "Global state" design note).

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{ComponentLabels, MetricsReporter};
