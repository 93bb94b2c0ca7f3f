// SPDX-License-Identifier: Apache-2.0

//! Prometheus-backed metrics reporter.
//!
//! Constructed once by the `Connector` and shared by `Arc` with every app/flow/component,
//! rather than reached for as a process-wide singleton — see SPEC_FULL.md's "Global state"
//! design note. Each component registers its own counter/histogram set keyed by
//! app/flow/component labels the first time it reports, and re-uses the same handles on every
//! subsequent metrics side-thread tick (§4.1).

use parking_lot::Mutex;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;

/// Labels identifying one component instance, attached to every metric it reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentLabels {
    /// Owning app name.
    pub app: String,
    /// Owning flow name.
    pub flow: String,
    /// Component name.
    pub component: String,
    /// Sibling instance index.
    pub component_index: u32,
}

impl ComponentLabels {
    fn label_values(&self) -> [&str; 3] {
        [self.app.as_str(), self.flow.as_str(), self.component.as_str()]
    }
}

const LABEL_NAMES: &[&str] = &["app", "flow", "component"];

struct Metrics {
    messages_in: CounterVec,
    messages_out: CounterVec,
    errors: CounterVec,
    invoke_duration_seconds: HistogramVec,
    queue_depth: IntGaugeVec,
}

/// Per-component metric set and the shared Prometheus registry backing it.
pub struct MetricsReporter {
    registry: Registry,
    metrics: Metrics,
    known_components: Mutex<HashMap<ComponentLabels, ()>>,
}

impl MetricsReporter {
    /// Builds a reporter against a fresh Prometheus registry.
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let messages_in = CounterVec::new(
            Opts::new("conduit_messages_in_total", "Messages dequeued by a component"),
            LABEL_NAMES,
        )?;
        let messages_out = CounterVec::new(
            Opts::new(
                "conduit_messages_out_total",
                "Messages enqueued by a component to its successor",
            ),
            LABEL_NAMES,
        )?;
        let errors = CounterVec::new(
            Opts::new("conduit_errors_total", "invoke() failures"),
            LABEL_NAMES,
        )?;
        let invoke_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "conduit_invoke_duration_seconds",
                "Wall time spent in invoke()",
            ),
            LABEL_NAMES,
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new(
                "conduit_queue_depth",
                "Current depth of a component's input queue",
            ),
            LABEL_NAMES,
        )?;

        registry.register(Box::new(messages_in.clone()))?;
        registry.register(Box::new(messages_out.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(invoke_duration_seconds.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let metrics = Metrics {
            messages_in,
            messages_out,
            errors,
            invoke_duration_seconds,
            queue_depth,
        };
        Ok(Arc::new(Self {
            registry,
            metrics,
            known_components: Mutex::new(HashMap::new()),
        }))
    }

    /// The backing registry, for wiring into a Prometheus scrape endpoint.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Records that a component instance dequeued one message.
    pub fn record_message_in(&self, labels: &ComponentLabels) {
        self.track(labels);
        self.metrics
            .messages_in
            .with_label_values(&labels.label_values())
            .inc();
    }

    /// Records that a component instance enqueued one message downstream.
    pub fn record_message_out(&self, labels: &ComponentLabels) {
        self.track(labels);
        self.metrics
            .messages_out
            .with_label_values(&labels.label_values())
            .inc();
    }

    /// Records one `invoke()` failure.
    pub fn record_error(&self, labels: &ComponentLabels) {
        self.track(labels);
        self.metrics
            .errors
            .with_label_values(&labels.label_values())
            .inc();
    }

    /// Records `invoke()` wall time.
    pub fn record_invoke_duration(&self, labels: &ComponentLabels, seconds: f64) {
        self.track(labels);
        self.metrics
            .invoke_duration_seconds
            .with_label_values(&labels.label_values())
            .observe(seconds);
    }

    /// Sets the current input-queue depth gauge for a component instance. Called by the periodic
    /// metrics side-thread described in §4.1.
    pub fn set_queue_depth(&self, labels: &ComponentLabels, depth: i64) {
        self.track(labels);
        self.metrics
            .queue_depth
            .with_label_values(&labels.label_values())
            .set(depth);
    }

    fn track(&self, labels: &ComponentLabels) {
        let mut known = self.known_components.lock();
        let _ = known.entry(labels.clone()).or_insert(());
    }
}
