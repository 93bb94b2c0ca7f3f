// SPDX-License-Identifier: Apache-2.0

//! The top-level connector (§2 component K): builds every configured app, owns the
//! connector-wide half of the combined stop signal and the process-wide [`TimerManager`] and
//! [`CacheService`], and is the single place `add_app`/`remove_app`/`get_app`/`get_apps`/
//! `send_message_to_flow` are serviced from, whether that call came from a management HTTP
//! handler (an external collaborator, not built here) or straight from [`crate`]'s own tests.
//!
//! `TimerManager`/`CacheService` are owned here, by value, rather than behind a process-wide
//! `static` -- see SPEC_FULL.md's "Global state" design note. Nothing in this crate's own
//! built-in components currently registers a timer or cache entry (the request/response
//! controller keeps its own pending-request table rather than routing through `CacheService`,
//! see `request_response.rs`'s crate doc), but the services are started and shut down here so a
//! pluggable component wired in by a deployment has somewhere to reach for them.

use crate::app::App;
use crate::error::Error;
use conduit_config::{AppConfig, RawConfig};
use conduit_engine::config_value::InvokeRegistry;
use conduit_engine::{CacheService, Event, Message, TimerManager};
use conduit_state::{AppStatus, ConnectorStatus};
use conduit_telemetry::metrics::MetricsReporter;
use conduit_traits::management::{ManagementEndpoint, ManagementRequest, ManagementSurface};
use conduit_traits::StopSignal;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Budget given to an app's three-phase shutdown when a caller doesn't specify one (e.g. the
/// management surface's `DELETE /apps/{name}` with no explicit `timeout`).
const DEFAULT_APP_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level container. One per running process.
pub struct Connector {
    instance_name: String,
    registry: InvokeRegistry,
    metrics: Arc<MetricsReporter>,
    monitoring_interval: Duration,
    connector_wide: StopSignal,
    timers: Arc<TimerManager>,
    cache: Arc<CacheService>,
    apps: Mutex<HashMap<String, App>>,
}

impl Connector {
    /// Builds a connector from a parsed configuration document, constructing (but not yet
    /// starting) every app it declares. `registry` supplies whatever `invoke:` functions the
    /// deployment has registered beyond the engine's own built-ins; pass
    /// [`InvokeRegistry::new`] for a deployment with none.
    pub fn new(config: &RawConfig, registry: InvokeRegistry) -> Result<Self, Error> {
        let metrics = MetricsReporter::new().map_err(|source| Error::Metrics(source.to_string()))?;

        let connector = Self {
            instance_name: config.instance_name.clone(),
            registry,
            metrics,
            monitoring_interval: config.monitoring.interval,
            connector_wide: StopSignal::new(),
            timers: Arc::new(TimerManager::new()),
            cache: Arc::new(CacheService::new()),
            apps: Mutex::new(HashMap::new()),
        };

        for app_config in config.effective_apps()? {
            app_config.validate()?;
            let name = app_config.name().to_owned();
            let app = connector.build_app(app_config);
            let _ = connector.apps.lock().insert(name, app);
        }

        Ok(connector)
    }

    fn build_app(&self, config: AppConfig) -> App {
        App::new(
            config,
            self.registry.clone(),
            self.metrics.clone(),
            self.monitoring_interval,
            self.connector_wide.clone(),
        )
    }

    /// The configured instance name, used in logs and as the connector-status label.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The process-wide timer scheduler (§4.8), shared by every component that registers one.
    #[must_use]
    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    /// The process-wide cache service (§4.9), shared by every component that uses one.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Starts every configured app in declaration order. If one fails to start, the apps started
    /// before it are left running (a partial connector is still observable and stoppable); the
    /// caller decides whether to tear the whole thing down via [`Connector::stop_all`].
    pub fn start_all(&self) -> Result<(), Error> {
        let mut apps = self.apps.lock();
        for app in apps.values_mut() {
            app.start()?;
        }
        Ok(())
    }

    /// Three-phase-stops every running app, dividing `budget` evenly across them, then shuts down
    /// the process-wide timer and cache services. Idempotent.
    pub fn stop_all(&self, budget: Duration) {
        self.connector_wide.set();
        let mut apps = self.apps.lock();
        let count = apps.len().max(1) as u32;
        let per_app = budget / count;
        for app in apps.values_mut() {
            if let Err(error) = app.stop(per_app) {
                tracing::warn!(app = app.name(), %error, "app failed to stop cleanly");
            }
        }
        self.timers.shutdown();
        self.cache.shutdown();
    }

    /// Adds and starts a new app at runtime. Refused if an app with this name already exists.
    pub fn add_app(&self, config: AppConfig) -> Result<(), Error> {
        config.validate()?;
        let name = config.name().to_owned();
        let mut apps = self.apps.lock();
        if apps.contains_key(&name) {
            return Err(Error::DuplicateApp(name));
        }
        let mut app = self.build_app(config);
        app.start()?;
        let _ = apps.insert(name, app);
        Ok(())
    }

    /// Stops and deregisters an app by name. `timeout` is the stop budget handed to
    /// [`App::stop`]; pass [`DEFAULT_APP_STOP_TIMEOUT`] when the caller has no preference.
    pub fn remove_app(&self, name: &str, timeout: Duration) -> Result<(), Error> {
        let mut apps = self.apps.lock();
        let mut app = apps.remove(name).ok_or_else(|| Error::UnknownName {
            what: "app",
            name: name.to_owned(),
        })?;
        app.stop(timeout)
    }

    /// A point-in-time snapshot of one app, by name.
    #[must_use]
    pub fn get_app(&self, name: &str) -> Option<AppStatus> {
        self.apps.lock().get(name).map(App::status)
    }

    /// A point-in-time snapshot of every app.
    #[must_use]
    pub fn get_apps(&self) -> Vec<AppStatus> {
        self.apps.lock().values().map(App::status).collect()
    }

    /// A point-in-time snapshot of the whole connector.
    #[must_use]
    pub fn status(&self) -> ConnectorStatus {
        let apps = self
            .apps
            .lock()
            .values()
            .map(App::status)
            .map(|status| (status.app_name.clone(), status))
            .collect();
        ConnectorStatus {
            instance_name: self.instance_name.clone(),
            apps,
        }
    }

    /// Injects `message` onto the named flow's input queue, searching every running app's flows
    /// in no particular order and delivering to the first match (flow names are expected to be
    /// unique across a connector's apps, but this does not enforce it). Used by the management
    /// surface and by components that want to forward a synthesized message into another flow
    /// without going through a broker round-trip.
    pub fn send_message_to_flow(&self, flow_name: &str, message: Message) -> Result<(), Error> {
        let apps = self.apps.lock();
        let sender = apps.values().find_map(|app| app.flow_input(flow_name));
        let Some(sender) = sender else {
            return Err(Error::UnknownName {
                what: "flow",
                name: flow_name.to_owned(),
            });
        };
        sender
            .send_timeout(Event::Message(message), Duration::from_secs(1))
            .map_err(|_| Error::UnknownName {
                what: "flow",
                name: flow_name.to_owned(),
            })
    }
}

impl ManagementSurface for Connector {
    fn get_management_endpoints(&self) -> Vec<ManagementEndpoint> {
        vec![
            ManagementEndpoint {
                method: "GET".to_owned(),
                path: "/status".to_owned(),
                description: "Snapshot of every app and its flows/components".to_owned(),
            },
            ManagementEndpoint {
                method: "GET".to_owned(),
                path: "/apps".to_owned(),
                description: "Snapshot of every app".to_owned(),
            },
            ManagementEndpoint {
                method: "GET".to_owned(),
                path: "/apps/{name}".to_owned(),
                description: "Snapshot of one app".to_owned(),
            },
            ManagementEndpoint {
                method: "DELETE".to_owned(),
                path: "/apps/{name}".to_owned(),
                description: "Stops and deregisters one app".to_owned(),
            },
        ]
    }

    fn handle_management_request(&self, request: ManagementRequest) -> Result<Value, String> {
        let parts: Vec<&str> = request.path_parts.iter().map(String::as_str).collect();
        match (request.method.as_str(), parts.as_slice()) {
            ("GET", ["status"]) => Ok(json!(self.status())),
            ("GET", ["apps"]) => Ok(json!(self.get_apps())),
            ("GET", ["apps", name]) => {
                self.get_app(name).map(|status| json!(status)).ok_or_else(|| format!("unknown app `{name}`"))
            }
            ("DELETE", ["apps", name]) => self
                .remove_app(name, DEFAULT_APP_STOP_TIMEOUT)
                .map(|()| json!({"removed": name}))
                .map_err(|error| error.to_string()),
            _ => Err(format!("no connector endpoint for {} /{}", request.method, request.path_parts.join("/"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::{BrokerConfig, ComponentConfig, FlowConfig, PayloadEncoding, PayloadFormat, SimplifiedAppConfig, SimplifiedComponentConfig, StandardAppConfig};
    use conduit_engine::error::ComponentError;
    use conduit_engine::factory::{ComponentFactory, COMPONENT_FACTORIES};
    use conduit_engine::Component;
    use serde_json::json;

    struct PassThrough;

    impl Component for PassThrough {
        fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
            Ok(Some(data))
        }
    }

    #[linkme::distributed_slice(COMPONENT_FACTORIES)]
    static CONNECTOR_TEST_FACTORY: ComponentFactory = ComponentFactory {
        name: "connector_test_pass_through",
        validate_config: conduit_config::no_config,
        create: |_| Ok(Box::new(PassThrough)),
    };

    fn one_component(name: &str) -> ComponentConfig {
        ComponentConfig {
            component_name: name.to_owned(),
            component_module: Some("connector_test_pass_through".to_owned()),
            component_class: None,
            num_instances: 1,
            queue_depth: 5,
            component_config: conduit_config::ConfigTree::Null,
            input_transforms: vec![],
            input_selection: None,
            broker_request_response: None,
        }
    }

    fn standard_raw_config(app_name: &str, flow_name: &str) -> RawConfig {
        RawConfig {
            instance_name: "test-instance".to_owned(),
            log: Default::default(),
            trace: Default::default(),
            cache: Default::default(),
            monitoring: Default::default(),
            apps: vec![AppConfig::Standard(StandardAppConfig {
                name: app_name.to_owned(),
                app_module: None,
                num_instances: 1,
                flows: vec![FlowConfig {
                    name: flow_name.to_owned(),
                    put_errors_in_error_queue: false,
                    components: vec![one_component("step")],
                }],
                error_flow: None,
            })],
            flows: vec![],
        }
    }

    #[test]
    fn builds_starts_and_stops_every_configured_app() {
        let connector = Connector::new(&standard_raw_config("orders", "main"), InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();
        assert_eq!(connector.get_apps().len(), 1);
        let status = connector.status();
        assert_eq!(status.instance_name, "test-instance");
        assert!(status.apps.contains_key("orders"));
        connector.stop_all(Duration::from_secs(2));
    }

    #[test]
    fn duplicate_app_names_in_config_are_rejected() {
        let mut config = standard_raw_config("orders", "main");
        config.apps.push(config.apps[0].clone());
        assert!(Connector::new(&config, InvokeRegistry::new()).is_err());
    }

    #[test]
    fn add_app_rejects_a_name_already_in_use() {
        let connector = Connector::new(&standard_raw_config("orders", "main"), InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();
        let duplicate = AppConfig::Standard(StandardAppConfig {
            name: "orders".to_owned(),
            app_module: None,
            num_instances: 1,
            flows: vec![FlowConfig {
                name: "other".to_owned(),
                put_errors_in_error_queue: false,
                components: vec![one_component("step")],
            }],
            error_flow: None,
        });
        assert!(matches!(connector.add_app(duplicate), Err(Error::DuplicateApp(_))));
        connector.stop_all(Duration::from_secs(2));
    }

    #[test]
    fn add_then_remove_app_round_trips() {
        let connector = Connector::new(&standard_raw_config("orders", "main"), InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();

        let extra = AppConfig::Standard(StandardAppConfig {
            name: "billing".to_owned(),
            app_module: None,
            num_instances: 1,
            flows: vec![FlowConfig {
                name: "billing-main".to_owned(),
                put_errors_in_error_queue: false,
                components: vec![one_component("step")],
            }],
            error_flow: None,
        });
        connector.add_app(extra).unwrap();
        assert_eq!(connector.get_apps().len(), 2);
        assert!(connector.get_app("billing").is_some());

        connector.remove_app("billing", Duration::from_secs(2)).unwrap();
        assert_eq!(connector.get_apps().len(), 1);
        assert!(connector.get_app("billing").is_none());

        assert!(matches!(
            connector.remove_app("billing", Duration::from_secs(2)),
            Err(Error::UnknownName { what: "app", .. })
        ));

        connector.stop_all(Duration::from_secs(2));
    }

    #[test]
    fn send_message_to_flow_delivers_to_the_named_flow() {
        let connector = Connector::new(&standard_raw_config("orders", "main"), InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();

        connector.send_message_to_flow("main", Message::new(json!({"x": 1}))).unwrap();

        assert!(matches!(
            connector.send_message_to_flow("does-not-exist", Message::new(json!(null))),
            Err(Error::UnknownName { what: "flow", .. })
        ));

        connector.stop_all(Duration::from_secs(2));
    }

    #[test]
    fn simplified_app_in_config_builds_and_stops() {
        let config = RawConfig {
            instance_name: "test-instance".to_owned(),
            log: Default::default(),
            trace: Default::default(),
            cache: Default::default(),
            monitoring: Default::default(),
            apps: vec![AppConfig::Simplified(SimplifiedAppConfig {
                name: "ingest".to_owned(),
                broker: BrokerConfig {
                    broker_type: "dev".to_owned(),
                    queue_name: None,
                    subscriptions: vec!["input/>".to_owned()],
                    max_redelivery: None,
                    create_queue_on_start: true,
                    broker_config: conduit_config::ConfigTree::Null,
                    payload_encoding: PayloadEncoding::None,
                    payload_format: PayloadFormat::Json,
                },
                components: vec![SimplifiedComponentConfig {
                    name: "step".to_owned(),
                    component_module: "connector_test_pass_through".to_owned(),
                    subscriptions: vec![],
                    component_config: conduit_config::ConfigTree::Null,
                }],
            })],
            flows: vec![],
        };
        let connector = Connector::new(&config, InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();
        assert_eq!(connector.get_apps().len(), 1);
        connector.stop_all(Duration::from_secs(2));
    }

    #[test]
    fn management_surface_reports_status_and_removes_apps() {
        let connector = Connector::new(&standard_raw_config("orders", "main"), InvokeRegistry::new()).unwrap();
        connector.start_all().unwrap();

        let status = connector
            .handle_management_request(ManagementRequest {
                method: "GET".to_owned(),
                path_parts: vec!["apps".to_owned(), "orders".to_owned()],
                body: Value::Null,
            })
            .unwrap();
        assert_eq!(status["app_name"], json!("orders"));

        connector
            .handle_management_request(ManagementRequest {
                method: "DELETE".to_owned(),
                path_parts: vec!["apps".to_owned(), "orders".to_owned()],
                body: Value::Null,
            })
            .unwrap();
        assert!(connector.get_app("orders").is_none());

        connector.stop_all(Duration::from_secs(2));
    }
}
