// SPDX-License-Identifier: Apache-2.0

//! A single app's lifecycle (§4.7): standard apps run an explicit, ordered list of flows;
//! simplified apps run the one implicit flow [`flow::build_simplified`] synthesizes. Owns the
//! app-local half of its flows' combined stop signal, so it alone can restart without touching
//! sibling apps, and drives the three-phase shutdown.

use crate::app_hooks::{self, AppHooks};
use crate::error::Error;
use crate::flow::{self, Flow};
use conduit_channel::mpmc::Sender;
use conduit_channel::mpsc;
use conduit_config::AppConfig;
use conduit_engine::config_value::InvokeRegistry;
use conduit_engine::Event;
use conduit_state::{AppPhase, AppStatus, ComponentStatus, ConnectionStatus, FlowStatus};
use conduit_telemetry::metrics::MetricsReporter;
use conduit_traits::management::{ManagementEndpoint, ManagementRequest, ManagementSurface};
use conduit_traits::{BrokerAdapter, BrokerStatus, CombinedStopSignal, StopSignal};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// What an app is actually running, once started. `None` before the first `start()` and again
/// after `stop()`.
enum Running {
    Standard { flows: Vec<Flow> },
    Simplified { flow: Flow, adapter: Arc<dyn BrokerAdapter> },
}

/// One configured app: its declaration, lifecycle state, and (while running) its flows.
pub struct App {
    config: AppConfig,
    registry: InvokeRegistry,
    metrics: Arc<MetricsReporter>,
    monitoring_interval: Duration,
    connector_wide: StopSignal,
    app_local: StopSignal,
    phase: AppPhase,
    hooks: Box<dyn AppHooks>,
    running: Option<Running>,
}

impl App {
    /// Builds an app in the `Created` phase. `connector_wide` is the signal shared by every app
    /// in the connector; `start()` pairs it with a fresh app-local half.
    #[must_use]
    pub fn new(
        config: AppConfig,
        registry: InvokeRegistry,
        metrics: Arc<MetricsReporter>,
        monitoring_interval: Duration,
        connector_wide: StopSignal,
    ) -> Self {
        Self {
            config,
            registry,
            metrics,
            monitoring_interval,
            connector_wide,
            app_local: StopSignal::new(),
            phase: AppPhase::Created,
            hooks: Box::new(NoopUntilStarted),
            running: None,
        }
    }

    /// The app's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> AppPhase {
        self.phase
    }

    /// The flow-0 input queue a caller feeds to inject a message, by flow name. `None` if the app
    /// isn't running or declares no flow with that name.
    #[must_use]
    pub fn flow_input(&self, flow_name: &str) -> Option<Sender<Event>> {
        match self.running.as_ref()? {
            Running::Standard { flows } => flows.iter().find(|f| f.name() == flow_name).map(Flow::input),
            Running::Simplified { flow, .. } => (flow.name() == flow_name).then(|| flow.input()),
        }
    }

    /// Starts the app from `Created` or `Stopped`. Builds its flows fresh (a restart reconstructs
    /// everything rather than reusing prior component state) and clears the app-local stop
    /// signal so components don't see it already set.
    pub fn start(&mut self) -> Result<(), Error> {
        if !matches!(self.phase, AppPhase::Created | AppPhase::Stopped) {
            return Err(Error::InvalidStartPhase {
                name: self.config.name().to_owned(),
                phase: self.phase,
            });
        }
        self.phase = AppPhase::Starting;
        self.app_local.clear();
        let stop_signal = CombinedStopSignal::new(self.connector_wide.clone(), self.app_local.clone());

        let running = match &self.config {
            AppConfig::Standard(standard) => {
                self.hooks = app_hooks::lookup(standard.app_module.as_deref());
                // Flows within one app build in declaration order so an `error_flow` target can
                // reference any flow declared earlier in the same app; a forward reference (or a
                // reference into a different app entirely) simply isn't wired, matching the "if
                // present" wording for error routing rather than failing startup over it.
                let mut built_inputs: HashMap<String, Sender<Event>> = HashMap::new();
                // Shared across every flow in this app: the error-input component's rate limit
                // is one budget per app, not one per flow that routes into it.
                let error_rate_limiter = standard
                    .error_flow
                    .as_ref()
                    .map(|target| Arc::new(conduit_engine::ErrorRateLimiter::new(target.max_errors_per_second)));
                let mut flows = Vec::with_capacity(standard.flows.len());
                for flow_config in &standard.flows {
                    let error_flow = standard.error_flow.as_ref().and_then(|target| {
                        if target.app_name != standard.name {
                            tracing::warn!(
                                app = %standard.name,
                                target_app = %target.app_name,
                                "error_flow targets another app; only same-app error flows are wired, errors will only be logged"
                            );
                            return None;
                        }
                        let sender = built_inputs.get(&target.flow_name).cloned();
                        if sender.is_none() {
                            tracing::warn!(
                                app = %standard.name,
                                target_flow = %target.flow_name,
                                "error_flow names a flow not yet built (or unknown); errors will only be logged until it exists"
                            );
                        }
                        sender
                    });
                    let flow = flow::build(
                        &standard.name,
                        flow_config,
                        &self.registry,
                        self.metrics.clone(),
                        self.monitoring_interval,
                        stop_signal.clone(),
                        error_flow,
                        error_rate_limiter.clone(),
                    )?;
                    let _ = built_inputs.insert(flow.name().to_owned(), flow.input());
                    flows.push(flow);
                }
                Running::Standard { flows }
            }
            AppConfig::Simplified(simplified) => {
                self.hooks = app_hooks::lookup(None);
                let (flow, adapter) = flow::build_simplified(
                    &simplified.name,
                    simplified,
                    &self.registry,
                    self.metrics.clone(),
                    self.monitoring_interval,
                    stop_signal,
                )?;
                Running::Simplified { flow, adapter }
            }
        };

        self.running = Some(running);
        self.phase = AppPhase::Running;
        Ok(())
    }

    /// Three-phase shutdown (§4.7): `pre_stop(timeout)` while components are still processing,
    /// then the app-local stop signal is set and every component thread is joined within its
    /// share of the remaining budget, then broker adapters (if any) disconnect. Idempotent: a
    /// second call on an already-stopped app is a no-op.
    pub fn stop(&mut self, budget: Duration) -> Result<(), Error> {
        let Some(mut running) = self.running.take() else {
            self.phase = AppPhase::Stopped;
            return Ok(());
        };
        self.phase = AppPhase::Stopping;

        let pre_stop_budget = budget / 4;
        let pre_stop_started = Instant::now();
        self.hooks.pre_stop(pre_stop_budget);

        self.app_local.set();

        let handles = match &mut running {
            Running::Standard { flows } => flows.iter_mut().flat_map(Flow::take_handles).collect(),
            Running::Simplified { flow, .. } => flow.take_handles(),
        };
        let join_budget = budget.saturating_sub(pre_stop_started.elapsed());
        join_within_budget(handles, join_budget, self.config.name());

        match running {
            Running::Standard { .. } => {}
            Running::Simplified { adapter, .. } => adapter.disconnect(),
        }

        self.phase = AppPhase::Stopped;
        Ok(())
    }

    /// A point-in-time snapshot of this app's flows and their components.
    #[must_use]
    pub fn status(&self) -> AppStatus {
        let flows = match &self.running {
            Some(Running::Standard { flows }) => flows.iter().map(flow_status).collect(),
            Some(Running::Simplified { flow, .. }) => vec![flow_status(flow)],
            None => Vec::new(),
        };
        AppStatus {
            app_name: self.config.name().to_owned(),
            phase: self.phase,
            flows,
        }
    }
}

struct NoopUntilStarted;
impl AppHooks for NoopUntilStarted {}

fn flow_status(flow: &Flow) -> FlowStatus {
    let queues = flow.queue_snapshot();
    let components = flow
        .handles()
        .iter()
        .zip(queues.iter())
        .map(|(handle, (component_name, instance_index, depth, capacity))| ComponentStatus {
            component_name: component_name.clone(),
            instance_index: *instance_index,
            queue_depth: *depth,
            queue_capacity: *capacity,
            messages_processed: handle.counters().messages_processed(),
            errors: handle.counters().errors(),
            connection_status: handle.connection_status().map(to_connection_status),
            observed_at: SystemTime::now(),
        })
        .collect();
    FlowStatus {
        flow_name: flow.name().to_owned(),
        components,
    }
}

fn to_connection_status(status: BrokerStatus) -> ConnectionStatus {
    match status {
        BrokerStatus::Disconnected => ConnectionStatus::Disconnected,
        BrokerStatus::Connecting => ConnectionStatus::Connecting,
        BrokerStatus::Reconnecting => ConnectionStatus::Reconnecting,
        BrokerStatus::Connected => ConnectionStatus::Connected,
    }
}

/// Joins each handle on its own thread, waiting up to an even share of `budget` per handle. A
/// handle that doesn't finish in time is left to join in the background; its resources are
/// reclaimed whenever it does, best-effort, rather than blocking the rest of shutdown on it.
fn join_within_budget(handles: Vec<conduit_engine::ComponentHandle>, budget: Duration, app: &str) {
    if handles.is_empty() {
        return;
    }
    let per_handle = (budget / handles.len() as u32).max(Duration::from_millis(1));
    for mut handle in handles {
        let (done_tx, done_rx) = mpsc::bounded::<()>(1);
        let spawned = std::thread::Builder::new().name("conduit-app-join".to_owned()).spawn(move || {
            handle.join();
            let _ = done_tx.send_timeout((), Duration::from_secs(5));
        });
        match spawned {
            Ok(_) if done_rx.recv_timeout(per_handle).is_ok() => {}
            Ok(_) => tracing::warn!(app, "component thread did not join within its shutdown budget; continuing without it"),
            Err(error) => tracing::warn!(app, %error, "failed to spawn join thread for a component handle"),
        }
    }
}

impl ManagementSurface for App {
    fn get_management_endpoints(&self) -> Vec<ManagementEndpoint> {
        vec![ManagementEndpoint {
            method: "GET".to_owned(),
            path: "/status".to_owned(),
            description: "Snapshot of this app's flows and component counters".to_owned(),
        }]
    }

    fn handle_management_request(&self, request: ManagementRequest) -> Result<Value, String> {
        let parts: Vec<&str> = request.path_parts.iter().map(String::as_str).collect();
        match (request.method.as_str(), parts.as_slice()) {
            ("GET", ["status"]) => Ok(json!(self.status())),
            _ => Err(format!("no app endpoint for {} /{}", request.method, request.path_parts.join("/"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::{ComponentConfig, FlowConfig, SimplifiedAppConfig, StandardAppConfig};
    use conduit_engine::error::ComponentError;
    use conduit_engine::factory::{ComponentFactory, COMPONENT_FACTORIES};
    use conduit_engine::{Component, Message};

    struct PassThrough;

    impl Component for PassThrough {
        fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
            Ok(Some(data))
        }
    }

    #[linkme::distributed_slice(COMPONENT_FACTORIES)]
    static APP_TEST_FACTORY: ComponentFactory = ComponentFactory {
        name: "app_test_pass_through",
        validate_config: conduit_config::no_config,
        create: |_| Ok(Box::new(PassThrough)),
    };

    fn standard_config(error_flow: Option<conduit_config::ErrorFlowConfig>) -> AppConfig {
        AppConfig::Standard(StandardAppConfig {
            name: "orders".to_owned(),
            app_module: None,
            num_instances: 1,
            flows: vec![
                FlowConfig {
                    name: "errors".to_owned(),
                    put_errors_in_error_queue: false,
                    components: vec![ComponentConfig {
                        component_name: "sink".to_owned(),
                        component_module: Some("app_test_pass_through".to_owned()),
                        component_class: None,
                        num_instances: 1,
                        queue_depth: 5,
                        component_config: conduit_config::ConfigTree::Null,
                        input_transforms: vec![],
                        input_selection: None,
                        broker_request_response: None,
                    }],
                },
                FlowConfig {
                    name: "main".to_owned(),
                    put_errors_in_error_queue: true,
                    components: vec![ComponentConfig {
                        component_name: "step".to_owned(),
                        component_module: Some("app_test_pass_through".to_owned()),
                        component_class: None,
                        num_instances: 1,
                        queue_depth: 5,
                        component_config: conduit_config::ConfigTree::Null,
                        input_transforms: vec![],
                        input_selection: None,
                        broker_request_response: None,
                    }],
                },
            ],
            error_flow,
        })
    }

    fn metrics() -> Arc<MetricsReporter> {
        Arc::new(MetricsReporter::new().unwrap())
    }

    #[test]
    fn starts_builds_flows_and_reports_running_status() {
        let mut app = App::new(
            standard_config(None),
            InvokeRegistry::new(),
            metrics(),
            Duration::from_secs(60),
            StopSignal::new(),
        );
        assert_eq!(app.phase(), AppPhase::Created);
        app.start().unwrap();
        assert_eq!(app.phase(), AppPhase::Running);
        let status = app.status();
        assert_eq!(status.flows.len(), 2);
        app.stop(Duration::from_secs(2)).unwrap();
        assert_eq!(app.phase(), AppPhase::Stopped);
    }

    #[test]
    fn start_from_running_is_rejected() {
        let mut app = App::new(
            standard_config(None),
            InvokeRegistry::new(),
            metrics(),
            Duration::from_secs(60),
            StopSignal::new(),
        );
        app.start().unwrap();
        assert!(matches!(app.start(), Err(Error::InvalidStartPhase { .. })));
        app.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn restart_after_stop_succeeds() {
        let mut app = App::new(
            standard_config(None),
            InvokeRegistry::new(),
            metrics(),
            Duration::from_secs(60),
            StopSignal::new(),
        );
        app.start().unwrap();
        app.stop(Duration::from_secs(2)).unwrap();
        app.start().unwrap();
        assert_eq!(app.phase(), AppPhase::Running);
        app.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn cross_app_error_flow_is_not_wired_but_does_not_fail_startup() {
        let error_flow = Some(conduit_config::ErrorFlowConfig {
            app_name: "some-other-app".to_owned(),
            flow_name: "main".to_owned(),
            max_queue_depth: 100,
            max_errors_per_second: 50,
        });
        let mut app = App::new(
            standard_config(error_flow),
            InvokeRegistry::new(),
            metrics(),
            Duration::from_secs(60),
            StopSignal::new(),
        );
        app.start().unwrap();
        app.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn simplified_app_starts_and_stops_cleanly() {
        let config = AppConfig::Simplified(SimplifiedAppConfig {
            name: "ingest".to_owned(),
            broker: conduit_config::BrokerConfig {
                broker_type: "dev".to_owned(),
                queue_name: None,
                subscriptions: vec!["input/>".to_owned()],
                max_redelivery: None,
                create_queue_on_start: true,
                broker_config: conduit_config::ConfigTree::Null,
                payload_encoding: conduit_config::PayloadEncoding::None,
                payload_format: conduit_config::PayloadFormat::Json,
            },
            components: vec![conduit_config::SimplifiedComponentConfig {
                name: "step".to_owned(),
                component_module: "app_test_pass_through".to_owned(),
                subscriptions: vec![],
                component_config: conduit_config::ConfigTree::Null,
            }],
        });
        let mut app = App::new(config, InvokeRegistry::new(), metrics(), Duration::from_secs(60), StopSignal::new());
        app.start().unwrap();
        assert_eq!(app.phase(), AppPhase::Running);
        let status = app.status();
        assert_eq!(status.flows.len(), 1);
        app.stop(Duration::from_secs(2)).unwrap();
        assert_eq!(app.phase(), AppPhase::Stopped);
    }
}
