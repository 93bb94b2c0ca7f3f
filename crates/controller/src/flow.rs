// SPDX-License-Identifier: Apache-2.0

//! Flow assembly (§4.2): turns a declared [`FlowConfig`] into a running chain of component
//! worker threads, wiring each group's shared input queue to the next group's, resolving
//! transforms and selection expressions once up front, and attaching the flow-level KV store and
//! lock manager every component in the flow shares.

use crate::error::Error;
use crate::kv::KvStore;
use crate::lock::LockManager;
use crate::subscription_router::{RouteTarget, SubscriptionRouter};
use conduit_broker::wildcard::{CompiledSubscription, DEFAULT_DELIMITER};
use conduit_broker::{BrokerInput, BrokerInputConfig, BrokerOutput, BrokerOutputConfig};
use conduit_channel::mpmc::{self, Receiver, Sender};
use conduit_config::value::ConfigTree;
use conduit_config::{FlowConfig, SimplifiedAppConfig, TransformConfig};
use conduit_engine::component::{spawn, ComponentHandle, ComponentRuntimeConfig};
use conduit_engine::config_value::{self, InvokeRegistry};
use conduit_engine::{Component, Event, Transform};
use conduit_telemetry::metrics::{ComponentLabels, MetricsReporter};
use conduit_traits::{BrokerAdapter, CombinedStopSignal, QueueBinding};
use std::sync::Arc;
use std::time::Duration;

fn resolve_transform(config: &TransformConfig, registry: &InvokeRegistry) -> Transform {
    match config {
        TransformConfig::Copy { source_expression, dest_expression } => Transform::Copy {
            source: source_expression.clone(),
            dest: dest_expression.clone(),
        },
        TransformConfig::Append { source_expression, dest_expression } => Transform::Append {
            source: source_expression.clone(),
            dest: dest_expression.clone(),
        },
        TransformConfig::Map { source_list_expression, dest_list_expression, processing_function } => Transform::Map {
            source_list: source_list_expression.clone(),
            dest_list: dest_list_expression.clone(),
            processing: processing_function.as_ref().map(|tree| config_value::resolve(tree, registry)),
        },
        TransformConfig::Filter { source_list_expression, dest_list_expression, filter_function } => Transform::Filter {
            source_list: source_list_expression.clone(),
            dest_list: dest_list_expression.clone(),
            predicate: config_value::resolve(filter_function, registry),
        },
        TransformConfig::Reduce { source_list_expression, dest_expression, initial_value, accumulator_function } => {
            Transform::Reduce {
                source_list: source_list_expression.clone(),
                dest: dest_expression.clone(),
                initial: config_value::resolve(initial_value, registry),
                accumulator: config_value::resolve(accumulator_function, registry),
            }
        }
        TransformConfig::CopyListItem { source_list_expression, source_property, dest_list_expression, dest_property } => {
            Transform::CopyListItem {
                source_list: source_list_expression.clone(),
                source_property: source_property.clone(),
                dest_list: dest_list_expression.clone(),
                dest_property: dest_property.clone(),
            }
        }
    }
}

/// A running flow: its component worker threads, plus the shared services its components read
/// and write through their own config (KV store, lock manager).
pub struct Flow {
    name: String,
    handles: Vec<ComponentHandle>,
    /// One entry per handle, in the same order: the component name, its instance index within
    /// its sibling group, and a clone of its shared input queue's receiving half, used to read
    /// current/capacity depth for status snapshots.
    queue_info: Vec<(String, u32, Receiver<Event>, usize)>,
    input: Sender<Event>,
    kv: Arc<KvStore>,
    locks: Arc<LockManager>,
}

impl Flow {
    /// The flow's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The input queue of the flow's first component group. Feeding an event here is how a
    /// broker input stage, a sibling flow, or `send_message_to_flow` injects work.
    #[must_use]
    pub fn input(&self) -> Sender<Event> {
        self.input.clone()
    }

    /// The flow-level KV store shared by every component in this flow.
    #[must_use]
    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    /// The flow-level lock manager shared by every component in this flow.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Every component instance's handle, in declaration order. Used to build status snapshots
    /// and to join on shutdown.
    #[must_use]
    pub fn handles(&self) -> &[ComponentHandle] {
        &self.handles
    }

    /// Mutable access to the handles, needed to join worker threads once the app's stop signal
    /// has been set.
    pub fn handles_mut(&mut self) -> &mut [ComponentHandle] {
        &mut self.handles
    }

    /// Takes ownership of every handle, leaving this flow with none. Used by the app lifecycle's
    /// shutdown, which joins each handle on its own thread so a slow one can't block the others
    /// within the shutdown budget.
    pub fn take_handles(&mut self) -> Vec<ComponentHandle> {
        std::mem::take(&mut self.handles)
    }

    /// One entry per handle: `(component_name, instance_index, queue_depth, queue_capacity)`,
    /// read live from the shared input queue each component instance was spawned against.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<(String, u32, usize, usize)> {
        self.queue_info
            .iter()
            .map(|(name, instance, rx, capacity)| (name.clone(), *instance, rx.len(), *capacity))
            .collect()
    }
}

/// Builds and starts every component instance declared in `config`, in declaration order.
///
/// Group *i*'s shared input queue is fed by group *i - 1*'s successful `invoke` results; the
/// flow's own `input()` is group 0's queue. `error_flow`, when given, is wired onto every
/// component only if `config.put_errors_in_error_queue` is set.
#[allow(clippy::too_many_arguments)]
pub fn build(
    app: &str,
    config: &FlowConfig,
    registry: &InvokeRegistry,
    metrics: Arc<MetricsReporter>,
    monitoring_interval: Duration,
    stop_signal: CombinedStopSignal,
    error_flow: Option<Sender<Event>>,
    error_rate_limiter: Option<Arc<conduit_engine::ErrorRateLimiter>>,
) -> Result<Flow, Error> {
    if config.components.is_empty() {
        return Err(Error::UnknownName {
            what: "component",
            name: format!("<flow `{}` declares no components>", config.name),
        });
    }

    let kv = Arc::new(KvStore::new());
    let locks = Arc::new(LockManager::new());

    let mut queues: Vec<(Sender<Event>, Receiver<Event>)> = Vec::with_capacity(config.components.len());
    for group in &config.components {
        queues.push(mpmc::bounded(group.queue_depth));
    }

    let mut handles = Vec::new();
    let mut queue_info = Vec::new();

    for (i, group) in config.components.iter().enumerate() {
        group.validate()?;
        let factory = conduit_engine::factory::lookup(group.factory_key())
            .ok_or_else(|| Error::UnknownComponentModule(group.factory_key().to_owned()))?;
        (factory.validate_config)(&group.component_config)?;

        let next = config.components.get(i + 1).map(|_| queues[i + 1].0.clone());
        let error_flow = if config.put_errors_in_error_queue { error_flow.clone() } else { None };
        let error_rate_limiter = if config.put_errors_in_error_queue { error_rate_limiter.clone() } else { None };

        let input_transforms: Vec<Transform> =
            group.input_transforms.iter().map(|t| resolve_transform(t, registry)).collect();
        let input_selection = group
            .input_selection
            .as_deref()
            .map(|expr| config_value::resolve(&ConfigTree::String(expr.to_owned()), registry));

        for instance in 0..group.num_instances {
            let mut component = (factory.create)(&group.component_config)
                .map_err(|source| Error::ComponentBuild { name: group.component_name.clone(), source })?;

            if let Some(rr_config) = &group.broker_request_response {
                let client = crate::request_response::build_client(rr_config)?;
                component.attach_request_response(client);
            }

            let runtime_config = ComponentRuntimeConfig {
                input_transforms: input_transforms.clone(),
                input_selection: input_selection.clone(),
                next: next.clone(),
                error_flow: error_flow.clone(),
                error_rate_limiter: error_rate_limiter.clone(),
                monitoring_interval,
            };
            let labels = ComponentLabels {
                app: app.to_owned(),
                flow: config.name.clone(),
                component: group.component_name.clone(),
                component_index: instance,
            };

            queue_info.push((group.component_name.clone(), instance, queues[i].1.clone(), group.queue_depth));
            let handle = spawn(component, queues[i].1.clone(), runtime_config, labels, metrics.clone(), stop_signal.clone());
            handles.push(handle);
        }
    }

    let input = queues[0].0.clone();
    Ok(Flow { name: config.name.clone(), handles, queue_info, input, kv, locks })
}

/// Builds the implicit flow a simplified app (`broker:` + `components:`) synthesizes: `[BrokerInput]
/// -> [SubscriptionRouter if >= 2 components] -> user components -> [BrokerOutput]`.
///
/// Returns the running flow alongside the broker adapter it connected, so the app can disconnect
/// it during its own `cleanup()` (the adapter isn't owned by any single component here the way it
/// is for a standard flow's `broker_input`/`broker_output` component declarations).
#[allow(clippy::too_many_arguments)]
pub fn build_simplified(
    app: &str,
    config: &SimplifiedAppConfig,
    registry: &InvokeRegistry,
    metrics: Arc<MetricsReporter>,
    monitoring_interval: Duration,
    stop_signal: CombinedStopSignal,
) -> Result<(Flow, Arc<dyn BrokerAdapter>), Error> {
    if config.components.is_empty() {
        return Err(Error::UnknownName {
            what: "component",
            name: format!("<simplified app `{}` declares no components>", config.name),
        });
    }

    let factory = conduit_broker::lookup_broker_adapter(&config.broker.broker_type)
        .ok_or_else(|| Error::UnknownBrokerType(config.broker.broker_type.clone()))?;
    let adapter = (factory.create)(&config.broker.broker_config)?;
    adapter.connect()?;

    let input_queue_name = adapter.bind_to_queue(QueueBinding {
        queue_name: config.broker.queue_name.clone(),
        subscriptions: config.broker.subscriptions.clone(),
        temporary: config.broker.queue_name.is_none(),
        max_redelivery: config.broker.max_redelivery,
        create_on_start: config.broker.create_queue_on_start,
    })?;

    let kv = Arc::new(KvStore::new());
    let locks = Arc::new(LockManager::new());
    let mut handles = Vec::new();
    let mut queue_info: Vec<(String, u32, Receiver<Event>, usize)> = Vec::new();

    let output_queue_depth = 16;
    let (output_tx, output_rx) = mpmc::bounded(output_queue_depth);
    queue_info.push(("broker_output".to_owned(), 0, output_rx.clone(), output_queue_depth));
    let output = BrokerOutput::new(
        adapter.clone(),
        BrokerOutputConfig {
            destination_expression: None,
            payload_encoding: config.broker.payload_encoding,
            payload_format: config.broker.payload_format,
            copy_user_properties: true,
            decrement_ttl: false,
            discard_on_ttl_expiration: false,
            propagate_acknowledgements: false,
        },
    );
    handles.push(spawn_labeled(
        Box::new(output),
        output_rx,
        None,
        None,
        app,
        &config.name,
        "broker_output",
        monitoring_interval,
        metrics.clone(),
        stop_signal.clone(),
    ));

    // Build each user component group, queue first so routing targets can reference it.
    let component_queue_depth = 5;
    let mut component_queues: Vec<(Sender<Event>, Receiver<Event>)> =
        config.components.iter().map(|_| mpmc::bounded(component_queue_depth)).collect();

    for (i, user) in config.components.iter().enumerate() {
        let user_factory =
            conduit_engine::factory::lookup(&user.component_module).ok_or_else(|| Error::UnknownComponentModule(user.component_module.clone()))?;
        (user_factory.validate_config)(&user.component_config)?;
        let component = (user_factory.create)(&user.component_config)
            .map_err(|source| Error::ComponentBuild { name: user.name.clone(), source })?;

        queue_info.push((user.name.clone(), 0, component_queues[i].1.clone(), component_queue_depth));
        handles.push(spawn_labeled(
            component,
            component_queues[i].1.clone(),
            Some(output_tx.clone()),
            None,
            app,
            &config.name,
            &user.name,
            monitoring_interval,
            metrics.clone(),
            stop_signal.clone(),
        ));
    }

    let router_input: Sender<Event> = if config.components.len() >= 2 {
        let targets = config
            .components
            .iter()
            .zip(component_queues.iter())
            .map(|(user, (tx, _))| RouteTarget {
                subscriptions: user
                    .subscriptions
                    .iter()
                    .map(|pattern| CompiledSubscription::compile(pattern, DEFAULT_DELIMITER))
                    .collect(),
                sender: tx.clone(),
            })
            .collect();
        let router_queue_depth = 5;
        let (router_tx, router_rx) = mpmc::bounded(router_queue_depth);
        queue_info.push(("subscription_router".to_owned(), 0, router_rx.clone(), router_queue_depth));
        let router = SubscriptionRouter::new(targets, stop_signal.clone());
        handles.push(spawn_labeled(
            Box::new(router),
            router_rx,
            None,
            None,
            app,
            &config.name,
            "subscription_router",
            monitoring_interval,
            metrics.clone(),
            stop_signal.clone(),
        ));
        router_tx
    } else {
        component_queues.remove(0).0
    };

    let input_queue_depth = 5;
    let (input_tx, input_rx) = mpmc::bounded(input_queue_depth);
    queue_info.push(("broker_input".to_owned(), 0, input_rx.clone(), input_queue_depth));
    let input_component = BrokerInput::new(
        adapter.clone(),
        BrokerInputConfig {
            queue_name: input_queue_name,
            payload_encoding: config.broker.payload_encoding,
            payload_format: config.broker.payload_format,
            topic_delimiter: DEFAULT_DELIMITER.to_owned(),
        },
        config.broker.subscriptions.clone(),
    );
    handles.push(spawn_labeled(
        Box::new(input_component),
        input_rx,
        Some(router_input),
        None,
        app,
        &config.name,
        "broker_input",
        monitoring_interval,
        metrics.clone(),
        stop_signal,
    ));

    Ok((
        Flow { name: config.name.clone(), handles, queue_info, input: input_tx, kv, locks },
        adapter,
    ))
}

#[allow(clippy::too_many_arguments)]
fn spawn_labeled(
    component: Box<dyn Component>,
    input: Receiver<Event>,
    next: Option<Sender<Event>>,
    error_flow: Option<Sender<Event>>,
    app: &str,
    flow: &str,
    component_name: &str,
    monitoring_interval: Duration,
    metrics: Arc<MetricsReporter>,
    stop_signal: CombinedStopSignal,
) -> ComponentHandle {
    let runtime_config = ComponentRuntimeConfig {
        input_transforms: vec![],
        input_selection: None,
        next,
        error_flow,
        error_rate_limiter: None,
        monitoring_interval,
    };
    let labels = ComponentLabels {
        app: app.to_owned(),
        flow: flow.to_owned(),
        component: component_name.to_owned(),
        component_index: 0,
    };
    spawn(component, input, runtime_config, labels, metrics, stop_signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::{ComponentConfig, FlowConfig};
    use conduit_engine::error::ComponentError;
    use conduit_engine::factory::{ComponentFactory, COMPONENT_FACTORIES};
    use conduit_engine::{Component, Message};
    use serde_json::{json, Value};

    struct PassThrough;

    impl Component for PassThrough {
        fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
            Ok(Some(data))
        }
    }

    #[linkme::distributed_slice(COMPONENT_FACTORIES)]
    static PASS_THROUGH_FACTORY: ComponentFactory = ComponentFactory {
        name: "flow_test_pass_through",
        validate_config: conduit_config::no_config,
        create: |_config| Ok(Box::new(PassThrough)),
    };

    fn flow_config() -> FlowConfig {
        FlowConfig {
            name: "main".to_owned(),
            put_errors_in_error_queue: false,
            components: vec![
                ComponentConfig {
                    component_name: "first".to_owned(),
                    component_module: Some("flow_test_pass_through".to_owned()),
                    component_class: None,
                    num_instances: 1,
                    queue_depth: 4,
                    component_config: ConfigTree::Null,
                    input_transforms: vec![],
                    input_selection: None,
                    broker_request_response: None,
                },
                ComponentConfig {
                    component_name: "second".to_owned(),
                    component_module: Some("flow_test_pass_through".to_owned()),
                    component_class: None,
                    num_instances: 2,
                    queue_depth: 4,
                    component_config: ConfigTree::Null,
                    input_transforms: vec![],
                    input_selection: None,
                    broker_request_response: None,
                },
            ],
        }
    }

    #[test]
    fn builds_one_handle_per_instance_across_groups() {
        let registry = InvokeRegistry::new();
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(conduit_traits::StopSignal::new(), conduit_traits::StopSignal::new());

        let mut flow = build(
            "app",
            &flow_config(),
            &registry,
            metrics,
            Duration::from_secs(60),
            stop.clone(),
            None,
            None,
        )
        .unwrap();

        assert_eq!(flow.handles().len(), 3);

        flow.input()
            .send_timeout(Event::Message(Message::new(json!(1))), Duration::from_secs(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        stop.app_local.set();
        for handle in flow.handles_mut() {
            handle.join();
        }
    }

    #[test]
    fn unknown_component_module_is_rejected() {
        let mut config = flow_config();
        config.components[0].component_module = Some("does_not_exist".to_owned());
        let registry = InvokeRegistry::new();
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(conduit_traits::StopSignal::new(), conduit_traits::StopSignal::new());

        let result = build("app", &config, &registry, metrics, Duration::from_secs(60), stop, None, None);
        assert!(matches!(result, Err(Error::UnknownComponentModule(_))));
    }
}
