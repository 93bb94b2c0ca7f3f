// SPDX-License-Identifier: Apache-2.0

//! The apps/flows/components document model.

use crate::error::Error;
use crate::value::ConfigTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The root configuration document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// A human-readable name for this connector instance, used in logs and metrics labels.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Distributed tracing configuration (propagation headers, sampling).
    #[serde(default)]
    pub trace: TraceConfig,

    /// Cache service defaults.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Metrics collection cadence and related settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// The preferred top-level key: a list of apps.
    #[serde(default)]
    pub apps: Vec<AppConfig>,

    /// Deprecated top-level key: a bare list of flows, implicitly wrapped into a single
    /// synthesized standard app named `"default"` at load time.
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

fn default_instance_name() -> String {
    "conduit".to_owned()
}

impl RawConfig {
    /// Parses a YAML document into a [`RawConfig`].
    ///
    /// Per the core's scope, this performs no environment-variable substitution; callers that
    /// need `${VAR}`-style interpolation are expected to do it upstream before calling this.
    pub fn from_yaml_str(input: &str) -> Result<Self, Error> {
        serde_yaml::from_str(input).map_err(|e| Error::Parse {
            details: e.to_string(),
        })
    }

    /// Returns the effective list of apps, folding the deprecated top-level `flows:` into a
    /// single synthesized app named `"default"` when present.
    pub fn effective_apps(&self) -> Result<Vec<AppConfig>, Error> {
        let mut apps = self.apps.clone();
        if !self.flows.is_empty() {
            apps.push(AppConfig::Standard(StandardAppConfig {
                name: "default".to_owned(),
                app_module: None,
                num_instances: 1,
                flows: self.flows.clone(),
                error_flow: None,
            }));
        }
        let mut seen = std::collections::HashSet::new();
        for app in &apps {
            if !seen.insert(app.name()) {
                return Err(Error::DuplicateApp {
                    name: app.name().to_owned(),
                });
            }
        }
        Ok(apps)
    }
}

/// Logging configuration, consumed by `conduit-telemetry`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing`/`EnvFilter`-compatible level or directive string, e.g. `"info"` or
    /// `"conduit_engine=debug,warn"`.
    pub level: String,
    /// Optional file path; when set, logs are additionally written there.
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

/// Tracing/propagation configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Whether trace context propagation is enabled.
    pub enabled: bool,
}

/// Defaults applied to the cache service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry expiry, in seconds, when a caller does not specify one.
    pub default_expiry_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiry_seconds: None,
        }
    }
}

/// Metrics collection cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Interval, in seconds, between metrics side-thread samples.
    #[serde(with = "humantime_serde", rename = "interval")]
    pub interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// An app: either a standard app with explicit `flows:`, or a simplified app that synthesizes
/// its flow from `broker:` + `components:`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AppConfig {
    /// `{ name, app_module?, num_instances?, flows: [...] }`
    Standard(StandardAppConfig),
    /// `{ name, broker, components: [...] }`
    Simplified(SimplifiedAppConfig),
}

impl AppConfig {
    /// The app's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            AppConfig::Standard(a) => &a.name,
            AppConfig::Simplified(a) => &a.name,
        }
    }

    /// Validates the app's shape (exactly one of the two forms must be well-formed).
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            AppConfig::Standard(a) if a.flows.is_empty() => Err(Error::AmbiguousAppShape {
                name: a.name.clone(),
            }),
            AppConfig::Simplified(a) if a.components.is_empty() => Err(Error::AmbiguousAppShape {
                name: a.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// A standard app: an explicit, ordered list of flows.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StandardAppConfig {
    /// The app's name, unique within a connector.
    pub name: String,
    /// Optional module providing app-level lifecycle hooks (`pre_stop`, management endpoints).
    #[serde(default)]
    pub app_module: Option<String>,
    /// Number of parallel app instances (rarely more than one; mirrors component
    /// `num_instances`).
    #[serde(default = "default_num_instances")]
    pub num_instances: u32,
    /// The app's flows, run in declaration order for construction purposes (they execute
    /// concurrently at runtime).
    pub flows: Vec<FlowConfig>,
    /// Where a component's processing errors land when its flow sets
    /// `put_errors_in_error_queue`.
    #[serde(default)]
    pub error_flow: Option<ErrorFlowConfig>,
}

/// A simplified app: a broker binding plus a flat list of components, expanded into an implicit
/// flow `[BrokerInput] -> [SubscriptionRouter?] -> components... -> [BrokerOutput]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimplifiedAppConfig {
    /// The app's name, unique within a connector.
    pub name: String,
    /// Broker connection and queue-binding configuration.
    pub broker: BrokerConfig,
    /// The user components placed between the synthesized input and output stages.
    pub components: Vec<SimplifiedComponentConfig>,
}

fn default_num_instances() -> u32 {
    1
}

/// Broker connection parameters for a simplified app (or a standalone `broker_request_response`
/// block).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Which registered broker adapter to instantiate (e.g. `"dev"`, `"solace"`).
    pub broker_type: String,
    /// Queue name to bind for input; `None` means a temporary queue is created.
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Topic subscriptions to bind to the input queue.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Maximum redelivery count before dead-lettering, if the adapter supports it.
    #[serde(default)]
    pub max_redelivery: Option<u32>,
    /// Whether to create the queue if it does not exist.
    #[serde(default = "default_true")]
    pub create_queue_on_start: bool,
    /// Adapter-specific configuration blob (connection string, credentials, etc).
    #[serde(default)]
    pub broker_config: ConfigTree,
    /// Payload codec applied at the broker boundary.
    #[serde(default)]
    pub payload_encoding: PayloadEncoding,
    /// Payload format applied at the broker boundary.
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

fn default_true() -> bool {
    true
}

impl Default for ConfigTree {
    fn default() -> Self {
        ConfigTree::Null
    }
}

/// Byte-level transport encoding of a broker payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// No transport encoding; bytes are used as-is.
    #[default]
    None,
    /// UTF-8 text.
    Utf8,
    /// Base64-encoded bytes.
    Base64,
    /// Gzip-compressed bytes.
    Gzip,
}

/// Structured format of a decoded broker payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// JSON document.
    #[default]
    Json,
    /// YAML document.
    Yaml,
    /// Plain text (no structure).
    Text,
    /// Raw, undecoded bytes.
    Bytes,
}

/// A component declaration within a simplified app.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimplifiedComponentConfig {
    /// The component's name within its app.
    pub name: String,
    /// Which registered component factory to instantiate.
    pub component_module: String,
    /// Topic-subscription patterns used by the `SubscriptionRouter`, if more than one component
    /// is declared.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// The component's own configuration tree.
    #[serde(default)]
    pub component_config: ConfigTree,
}

/// A flow: an ordered chain of components.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConfig {
    /// The flow's name, unique within its app.
    pub name: String,
    /// When true, processing errors from this flow's components are routed to the app's error
    /// flow (if configured) instead of only being logged.
    #[serde(default)]
    pub put_errors_in_error_queue: bool,
    /// The flow's components, in pipeline order.
    pub components: Vec<ComponentConfig>,
}

/// A single component declaration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComponentConfig {
    /// The component's name within its flow.
    pub component_name: String,
    /// Which registered component factory to instantiate, by name.
    #[serde(default)]
    pub component_module: Option<String>,
    /// A fully-qualified class-style path to a component factory (alternative to
    /// `component_module`, mutually exclusive).
    #[serde(default)]
    pub component_class: Option<String>,
    /// Number of sibling instances sharing one input queue.
    #[serde(default = "default_num_instances")]
    pub num_instances: u32,
    /// Depth of the shared input queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// The component's own configuration tree.
    #[serde(default)]
    pub component_config: ConfigTree,
    /// Transforms applied to each incoming message before `invoke`.
    #[serde(default)]
    pub input_transforms: Vec<TransformConfig>,
    /// Expression selecting the `data` argument passed to `invoke`. Defaults to the whole
    /// `previous` payload when omitted.
    #[serde(default)]
    pub input_selection: Option<String>,
    /// Request/response controller configuration, when this component issues broker requests.
    #[serde(default)]
    pub broker_request_response: Option<RequestResponseConfig>,
}

fn default_queue_depth() -> usize {
    5
}

impl ComponentConfig {
    /// Validates that exactly one of `component_module`/`component_class` is set.
    pub fn validate(&self) -> Result<(), Error> {
        match (&self.component_module, &self.component_class) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(Error::AmbiguousComponentShape {
                name: self.component_name.clone(),
            }),
        }
    }

    /// The resolved factory key, preferring `component_module`.
    #[must_use]
    pub fn factory_key(&self) -> &str {
        self.component_module
            .as_deref()
            .or(self.component_class.as_deref())
            .unwrap_or("")
    }
}

/// Configuration for a `broker_request_response` facility attached to a component.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestResponseConfig {
    /// Broker connection used for the request/response round trip.
    pub broker: BrokerConfig,
    /// Prefix under which the per-requestor reply topic is created, e.g.
    /// `"responses/my-app"`.
    pub response_topic_prefix: String,
    /// Suffix appended after the requestor UUID, e.g. `"res"`.
    #[serde(default = "default_response_suffix")]
    pub response_topic_suffix: String,
    /// How long a pending request waits for a reply before timing out.
    #[serde(with = "humantime_serde", default = "default_request_expiry")]
    pub request_expiry_ms: Duration,
    /// Expression used to inject the response topic into the outgoing payload, if set.
    #[serde(default)]
    pub response_topic_insertion_expression: Option<String>,
    /// Maximum number of independently-owned sessions (multi-session variant).
    #[serde(default)]
    pub max_sessions: Option<u32>,
}

fn default_response_suffix() -> String {
    "res".to_owned()
}

fn default_request_expiry() -> Duration {
    Duration::from_secs(30)
}

/// A transform applied to a message before `invoke`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Copy one expression's value to another.
    Copy {
        /// Source expression.
        source_expression: String,
        /// Destination expression.
        dest_expression: String,
    },
    /// Append a value to a list at the destination, creating it if absent.
    Append {
        /// Source expression.
        source_expression: String,
        /// Destination expression (must resolve to, or be creatable as, a list).
        dest_expression: String,
    },
    /// Map a source list through an optional processing function into a destination list.
    Map {
        /// Expression selecting the source list.
        source_list_expression: String,
        /// Expression selecting the destination list.
        dest_list_expression: String,
        /// Optional per-element processing directive.
        #[serde(default)]
        processing_function: Option<ConfigTree>,
    },
    /// Like `map`, but keeps only elements for which `filter_function` is truthy.
    Filter {
        /// Expression selecting the source list.
        source_list_expression: String,
        /// Expression selecting the destination list.
        dest_list_expression: String,
        /// Predicate directive; truthy results keep the element.
        filter_function: ConfigTree,
    },
    /// Fold a source list into a single accumulated value.
    Reduce {
        /// Expression selecting the source list.
        source_list_expression: String,
        /// Expression the final accumulated value is written to.
        dest_expression: String,
        /// Seed value for the accumulator.
        initial_value: ConfigTree,
        /// Directive invoked once per element with the running accumulator.
        accumulator_function: ConfigTree,
    },
    /// Deprecated single-field extraction form of `map`.
    CopyListItem {
        /// Expression selecting the source list.
        source_list_expression: String,
        /// Property name read from each source element.
        source_property: String,
        /// Expression selecting the destination list.
        dest_list_expression: String,
        /// Property name written on each destination element.
        dest_property: String,
    },
}

/// Top-level config tree for an internal/error flow, used by `conduit-controller` to wire the
/// optional error flow referenced in §6/§7.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorFlowConfig {
    /// Name of the app whose flow receives error messages.
    pub app_name: String,
    /// Name of the flow within that app.
    pub flow_name: String,
    /// Maximum queue depth for the error-input component; excess errors are dropped with a
    /// warning rather than applying backpressure to the faulting component.
    #[serde(default = "default_error_queue_depth")]
    pub max_queue_depth: usize,
    /// Maximum errors accepted per second before the rate limiter starts dropping.
    #[serde(default = "default_error_rate_limit")]
    pub max_errors_per_second: u32,
}

fn default_error_queue_depth() -> usize {
    100
}

fn default_error_rate_limit() -> u32 {
    50
}

/// Convenience alias kept for symmetry with `conduit_config::RawConfig::apps`'s element type.
pub type Apps = BTreeMap<String, AppConfig>;
