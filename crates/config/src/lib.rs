// SPDX-License-Identifier: Apache-2.0

//! Configuration model for apps/flows/components.
//!
//! This crate owns the *document* shape — `RawConfig` and its nested `AppConfig`/`FlowConfig`/
//! `ComponentConfig`/`TransformConfig` types — plus the `ConfigTree` sum type that lets any
//! scalar in a component's config be replaced with a deferred `invoke:` directive.
//!
//! It deliberately stops short of evaluating those directives: resolving a `ConfigTree` into a
//! `Static` value or a per-message `Closure` requires the expression evaluator, which lives in
//! `conduit-engine` to avoid a dependency cycle. YAML file loading performs no environment
//! variable substitution; that step is an external collaborator (see crate root docs of
//! `conduit-config`'s README-equivalent, the crate-level spec notes) and is expected to run
//! before `RawConfig::from_yaml_str` is called.

pub mod error;
pub mod model;
pub mod validation;
pub mod value;

pub use error::Error;
pub use model::{
    AppConfig, BrokerConfig, CacheConfig, ComponentConfig, ErrorFlowConfig, FlowConfig, LogConfig,
    MonitoringConfig, PayloadEncoding, PayloadFormat, RawConfig, RequestResponseConfig,
    SimplifiedAppConfig, SimplifiedComponentConfig, StandardAppConfig, TraceConfig,
    TransformConfig,
};
pub use validation::{no_config, validate_component_config};
pub use value::{ConfigTree, InvokeDirective, InvokeParams};
