// SPDX-License-Identifier: Apache-2.0

//! The component runtime (§4.1): the `Component` trait every processing step implements, and the
//! worker loop that drives one sibling instance of it on its own OS thread.

use crate::config_value::ConfigValue;
use crate::error::{ComponentError, ComponentErrorKind};
use crate::event::Event;
use crate::message::{AckCallback, Message, NackCallback};
use crate::rate_limit::ErrorRateLimiter;
use crate::request_response::RequestResponseClient;
use crate::transforms::Transform;
use conduit_channel::mpmc::{Receiver, Sender};
use conduit_telemetry::metrics::{ComponentLabels, MetricsReporter};
use conduit_traits::{BrokerStatus, CombinedStopSignal, NackOutcome};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The longest a worker backs off after a consecutive run of `invoke()` failures.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How long a queue dequeue blocks before re-checking the stop signal.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// The processing step every pipeline stage implements.
///
/// Default method bodies cover the common case (a pure transform with no timers, no cache
/// interest, and no broker-facing side effects); sources and sinks override the handful of hooks
/// that apply to them. Mirrors the optional-override shape described for the component contract:
/// everything beyond `invoke` is opt-in.
pub trait Component: Send {
    /// The processing step itself. `data` is whatever `input_selection` resolved to from the
    /// incoming message; returning `Ok(Some(value))` sets `message.previous` and forwards the
    /// message; `Ok(None)` consumes the message without forwarding (the component is expected to
    /// have settled it itself, e.g. via `send_message`).
    fn invoke(&mut self, message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError>;

    /// Overridden by source components with no runtime-fed input queue (e.g. `BrokerInput`),
    /// which originate their own events instead of dequeuing one.
    fn get_next_event(&mut self, _timeout: Duration) -> Option<Event> {
        None
    }

    /// An extra ack callback to attach to the chain after a successful `invoke`, beyond whatever
    /// the message already carries.
    fn get_acknowledgement_callback(&mut self) -> Option<AckCallback> {
        None
    }

    /// An extra nack callback to attach after a failed `invoke`.
    fn get_negative_acknowledgement_callback(&mut self) -> Option<NackCallback> {
        None
    }

    /// Maps an `invoke()` failure kind to the outcome reported to the broker on nack. Default
    /// matches [`ComponentError::default_nack_outcome`]: reject rather than request redelivery,
    /// since an unclassified failure is more likely a poison message than a transient one.
    fn nack_reaction_to_exception(&self, _kind: ComponentErrorKind) -> NackOutcome {
        NackOutcome::Rejected
    }

    /// Called when a [`Event::Timer`] this component registered fires.
    fn handle_timer_event(&mut self, _timer_id: u64, _payload: Value) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called when a [`Event::CacheExpiry`] this component owns fires.
    fn handle_cache_expiry_event(
        &mut self,
        _key: String,
        _metadata: Value,
        _expired_data: Value,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Overridden by terminal sinks (e.g. `BrokerOutput`) to publish the message themselves
    /// instead of forwarding it to a `next_component`. Returning `Ok(())` is expected to have
    /// settled the message (ack or nack) before returning.
    fn send_message(&mut self, _message: &mut Message) -> Result<(), ComponentError> {
        Ok(())
    }

    /// True if this component is a terminal sink that calls `send_message` instead of being
    /// chained to a `next_component`. Determines the worker loop's dispatch branch.
    fn is_terminal_sink(&self) -> bool {
        false
    }

    /// Hook run once before the worker thread exits, idempotent. Used to e.g. unsubscribe or shed
    /// in-flight broker work before `cleanup`.
    fn stop_component(&mut self) {}

    /// Releases resources (broker connections, file handles) once the worker has stopped. Runs
    /// after the input queue has been drained. Idempotent.
    fn cleanup(&mut self) {}

    /// Connection status, for components that front a broker connection. `None` for components
    /// with no connection concept.
    fn get_connection_status(&self) -> Option<BrokerStatus> {
        None
    }

    /// Injected once at construction time when this component's declaration carries a
    /// `broker_request_response` block, giving it a handle to issue correlated broker requests.
    /// Components that don't use request/response leave this a no-op.
    fn attach_request_response(&mut self, _client: Arc<dyn RequestResponseClient>) {}
}

/// Per-instance configuration resolved once at flow-build time, independent of the `Component`
/// implementation itself.
pub struct ComponentRuntimeConfig {
    /// Transforms applied to every `Message` event before `invoke`.
    pub input_transforms: Vec<Transform>,
    /// Expression selecting the value handed to `invoke` as `data`. `None` defaults to the whole
    /// payload.
    pub input_selection: Option<ConfigValue>,
    /// Where to send a message after a successful, forwarding `invoke` call. `None` means this
    /// component is the last in its flow (or a terminal sink).
    pub next: Option<Sender<Event>>,
    /// Where to send synthesized error records, if an error flow is configured for this app.
    pub error_flow: Option<Sender<Event>>,
    /// Bounds how many error records per second this app's error flow accepts, shared by every
    /// component that routes into it. `None` alongside a `Some(error_flow)` would mean
    /// unthrottled; in practice [`crate::factory`] callers always pair the two.
    pub error_rate_limiter: Option<Arc<ErrorRateLimiter>>,
    /// How often the metrics/connection-status side-threads sample.
    pub monitoring_interval: Duration,
}

/// Live counters a controller reads to build a [`conduit_state`]-shaped status snapshot, without
/// `conduit-engine` needing a dependency on that crate.
#[derive(Default)]
pub struct ComponentCounters {
    messages_processed: AtomicU64,
    errors: AtomicU64,
}

impl ComponentCounters {
    /// Total messages successfully processed since start.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Total `invoke()` failures since start.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// A running component instance: its worker thread plus the side-threads sampling its metrics and
/// connection status.
pub struct ComponentHandle {
    worker: Option<JoinHandle<()>>,
    metrics_thread: Option<JoinHandle<()>>,
    status_thread: Option<JoinHandle<()>>,
    counters: Arc<ComponentCounters>,
    connection_status: Arc<parking_lot::Mutex<Option<BrokerStatus>>>,
    stop_signal: CombinedStopSignal,
}

impl ComponentHandle {
    /// Live counters for this instance, safe to read from any thread.
    #[must_use]
    pub fn counters(&self) -> Arc<ComponentCounters> {
        self.counters.clone()
    }

    /// Most recently sampled connection status.
    #[must_use]
    pub fn connection_status(&self) -> Option<BrokerStatus> {
        *self.connection_status.lock()
    }

    /// The combined stop signal this instance observes, shared with its siblings.
    #[must_use]
    pub fn stop_signal(&self) -> &CombinedStopSignal {
        &self.stop_signal
    }

    /// Joins every thread owned by this instance. Expected to be called after the stop signal has
    /// been set; does not itself set it (the app lifecycle owns that, since siblings share a
    /// signal and must all observe the same set before any one of them is joined).
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.metrics_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.status_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns a component instance's worker thread plus its metrics and connection-status
/// side-threads, returning a handle the flow/app keeps to join on shutdown.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    mut component: Box<dyn Component>,
    input: Receiver<Event>,
    config: ComponentRuntimeConfig,
    labels: ComponentLabels,
    metrics: Arc<MetricsReporter>,
    stop_signal: CombinedStopSignal,
) -> ComponentHandle {
    let counters = Arc::new(ComponentCounters::default());
    let connection_status = Arc::new(parking_lot::Mutex::new(None));
    let monitoring_interval = config.monitoring_interval;

    let worker = {
        let counters = counters.clone();
        let labels = labels.clone();
        let metrics = metrics.clone();
        let stop_signal = stop_signal.clone();
        let input = input.clone();
        let connection_status_worker = connection_status.clone();
        std::thread::Builder::new()
            .name(format!("conduit-worker-{}-{}", labels.component, labels.component_index))
            .spawn(move || {
                let span = tracing::info_span!(
                    "component_worker",
                    app = %labels.app,
                    flow = %labels.flow,
                    component = %labels.component,
                    component_index = labels.component_index,
                );
                let _guard = span.enter();
                worker_loop(
                    component.as_mut(),
                    &input,
                    &config,
                    &labels,
                    &metrics,
                    &stop_signal,
                    &counters,
                    &connection_status_worker,
                );
                component.stop_component();
                for event in input.drain() {
                    drop(event);
                }
                component.cleanup();
            })
            .expect("failed to spawn component worker thread")
    };

    let metrics_thread = {
        let labels = labels.clone();
        let metrics = metrics.clone();
        let stop_signal = stop_signal.clone();
        let input = input.clone();
        std::thread::Builder::new()
            .name(format!("conduit-metrics-{}-{}", labels.component, labels.component_index))
            .spawn(move || {
                while !stop_signal.wait(monitoring_interval) {
                    metrics.set_queue_depth(&labels, input.len() as i64);
                }
            })
            .expect("failed to spawn metrics side-thread")
    };

    // Connection-status sampling needs read access to the live `Component`, which the worker
    // thread owns exclusively. Rather than race a separate thread against it, the worker itself
    // refreshes `connection_status` once per loop iteration (see `worker_loop`).
    ComponentHandle {
        worker: Some(worker),
        metrics_thread: Some(metrics_thread),
        status_thread: None,
        counters,
        connection_status,
        stop_signal,
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    component: &mut dyn Component,
    input: &Receiver<Event>,
    config: &ComponentRuntimeConfig,
    labels: &ComponentLabels,
    metrics: &MetricsReporter,
    stop_signal: &CombinedStopSignal,
    counters: &ComponentCounters,
    connection_status: &parking_lot::Mutex<Option<BrokerStatus>>,
) {
    let mut consecutive_errors: u32 = 0;

    loop {
        if stop_signal.is_set() {
            return;
        }

        *connection_status.lock() = component.get_connection_status();

        let event = match component.get_next_event(POLL_TIMEOUT) {
            Some(event) => event,
            None => match input.recv_timeout(POLL_TIMEOUT) {
                Ok(event) => event,
                Err(_) => continue,
            },
        };

        match event {
            Event::Message(mut message) => {
                metrics.record_message_in(labels);
                let outcome = process_message(component, &mut message, config, stop_signal);
                match outcome {
                    Ok(()) => {
                        consecutive_errors = 0;
                        let _ = counters.messages_processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        let _ = counters.errors.fetch_add(1, Ordering::Relaxed);
                        metrics.record_error(labels);
                        tracing::warn!(kind = %error.kind, detail = %error.message, "invoke failed");
                        let outcome = component.nack_reaction_to_exception(error.kind);
                        if let Some(callback) = component.get_negative_acknowledgement_callback() {
                            message.add_nack_callback(callback);
                        }
                        message.call_negative_acknowledgements(outcome);
                        emit_error_record(config, labels, &error, &message);

                        consecutive_errors = consecutive_errors.saturating_add(1);
                        let backoff = backoff_for(consecutive_errors);
                        if stop_signal.wait(backoff) {
                            return;
                        }
                    }
                }
            }
            Event::Timer { timer_id, payload } => {
                if let Err(error) = component.handle_timer_event(timer_id, payload) {
                    tracing::warn!(kind = %error.kind, detail = %error.message, "handle_timer_event failed");
                }
            }
            Event::CacheExpiry { key, metadata, expired_data } => {
                if let Err(error) = component.handle_cache_expiry_event(key, metadata, expired_data) {
                    tracing::warn!(kind = %error.kind, detail = %error.message, "handle_cache_expiry_event failed");
                }
            }
        }
    }
}

fn process_message(
    component: &mut dyn Component,
    message: &mut Message,
    config: &ComponentRuntimeConfig,
    stop_signal: &CombinedStopSignal,
) -> Result<(), ComponentError> {
    for transform in &config.input_transforms {
        transform.apply(message)?;
    }

    let data = match &config.input_selection {
        Some(selector) => selector.resolve(message)?,
        None => message.payload.clone(),
    };

    let result = component.invoke(message, data)?;

    if component.is_terminal_sink() {
        component.send_message(message)?;
        return Ok(());
    }

    match result {
        Some(value) => {
            message.previous = value;
            if let Some(callback) = component.get_acknowledgement_callback() {
                message.add_ack_callback(callback);
            }
            match &config.next {
                Some(next) => {
                    let mut event = Event::Message(std::mem::replace(message, Message::new(Value::Null)));
                    loop {
                        match next.send_timeout(event, POLL_TIMEOUT) {
                            Ok(()) => break,
                            Err(conduit_channel::error::SendError::Timeout(returned)) => {
                                if stop_signal.is_set() {
                                    tracing::warn!("dropping message unsent at shutdown");
                                    break;
                                }
                                event = returned;
                            }
                            Err(conduit_channel::error::SendError::Closed(_)) => {
                                return Err(ComponentError::new(
                                    ComponentErrorKind::Other,
                                    "downstream component's input queue is closed",
                                ));
                            }
                        }
                    }
                }
                None => message.call_acknowledgements(),
            }
        }
        None => {
            // The component consumed the message itself (e.g. discarded it, or will settle it
            // asynchronously); nothing further to forward.
        }
    }
    Ok(())
}

fn emit_error_record(config: &ComponentRuntimeConfig, labels: &ComponentLabels, error: &ComponentError, failed: &Message) {
    let Some(error_flow) = &config.error_flow else {
        return;
    };
    if let Some(limiter) = &config.error_rate_limiter {
        if !limiter.try_admit() {
            tracing::warn!(component = %labels.component, "error rate limit exceeded, dropping error record");
            return;
        }
    }
    let record = serde_json::json!({
        "error": {
            "text": error.message,
            "exception_kind": error.kind.to_string(),
            "traceback": serde_json::Value::Null,
        },
        "location": {
            "instance": labels.app,
            "flow": labels.flow,
            "component": labels.component,
            "component_index": labels.component_index,
        },
        "message": {
            "payload": failed.payload,
            "topic": failed.topic,
            "user_properties": failed.user_properties,
            "user_data": failed.user_data,
            "previous": failed.previous,
        },
    });
    let message = Message::new(record);
    // Best-effort: an error flow at capacity drops the record rather than blocking the worker
    // that is already handling a failure.
    if error_flow.send_timeout(Event::Message(message), Duration::from_millis(100)).is_err() {
        tracing::warn!(component = %labels.component, "error flow queue is full, dropping error record");
    }
}

fn backoff_for(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.min(6); // 2^6 = 64s, already past the 60s cap
    let secs = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_channel::mpmc;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    struct DoubleIt;

    impl Component for DoubleIt {
        fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
            let n = data.as_i64().ok_or_else(|| ComponentError::invoke("expected an integer"))?;
            Ok(Some(json!(n * 2)))
        }
    }

    struct AlwaysFails;

    impl Component for AlwaysFails {
        fn invoke(&mut self, _message: &mut Message, _data: Value) -> Result<Option<Value>, ComponentError> {
            Err(ComponentError::invoke("boom"))
        }
    }

    fn labels() -> ComponentLabels {
        ComponentLabels {
            app: "a".to_owned(),
            flow: "f".to_owned(),
            component: "c".to_owned(),
            component_index: 0,
        }
    }

    #[test]
    fn successful_invoke_forwards_to_next_with_previous_set() {
        let (in_tx, in_rx) = mpmc::bounded(4);
        let (next_tx, next_rx) = mpmc::bounded(4);
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(
            conduit_traits::StopSignal::new(),
            conduit_traits::StopSignal::new(),
        );

        let config = ComponentRuntimeConfig {
            input_transforms: vec![],
            input_selection: None,
            next: Some(next_tx),
            error_flow: None,
            error_rate_limiter: None,
            monitoring_interval: Duration::from_secs(60),
        };

        let mut handle = spawn(Box::new(DoubleIt), in_rx, config, labels(), metrics, stop.clone());

        in_tx
            .send_timeout(Event::Message(Message::new(json!(21))), Duration::from_secs(1))
            .unwrap();

        let forwarded = next_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match forwarded {
            Event::Message(message) => assert_eq!(message.previous, json!(42)),
            other => panic!("expected Message, got {other:?}"),
        }

        stop.app_local.set();
        handle.join();
    }

    #[test]
    fn failed_invoke_nacks_and_does_not_forward() {
        let (in_tx, in_rx) = mpmc::bounded(4);
        let (next_tx, next_rx) = mpmc::bounded(4);
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(
            conduit_traits::StopSignal::new(),
            conduit_traits::StopSignal::new(),
        );

        let config = ComponentRuntimeConfig {
            input_transforms: vec![],
            input_selection: None,
            next: Some(next_tx),
            error_flow: None,
            error_rate_limiter: None,
            monitoring_interval: Duration::from_secs(60),
        };

        let nacked = Arc::new(AtomicBool::new(false));
        let nacked2 = nacked.clone();
        let mut message = Message::new(json!(1));
        message.add_nack_callback(Box::new(move |_outcome| nacked2.store(true, Ordering::SeqCst)));

        let mut handle = spawn(Box::new(AlwaysFails), in_rx, config, labels(), metrics, stop.clone());
        in_tx.send_timeout(Event::Message(message), Duration::from_secs(1)).unwrap();

        // Give the worker a moment to run invoke, nack, then start its backoff sleep.
        std::thread::sleep(Duration::from_millis(100));
        assert!(nacked.load(Ordering::SeqCst));
        assert!(next_rx.recv_timeout(Duration::from_millis(50)).is_err());

        stop.app_local.set();
        handle.join();
    }

    #[test]
    fn last_component_in_chain_self_acknowledges() {
        let (in_tx, in_rx) = mpmc::bounded(4);
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(
            conduit_traits::StopSignal::new(),
            conduit_traits::StopSignal::new(),
        );
        let config = ComponentRuntimeConfig {
            input_transforms: vec![],
            input_selection: None,
            next: None,
            error_flow: None,
            error_rate_limiter: None,
            monitoring_interval: Duration::from_secs(60),
        };

        let acked = Arc::new(AtomicBool::new(false));
        let acked2 = acked.clone();
        let mut message = Message::new(json!(5));
        message.add_ack_callback(Box::new(move || acked2.store(true, Ordering::SeqCst)));

        let mut handle = spawn(Box::new(DoubleIt), in_rx, config, labels(), metrics, stop.clone());
        in_tx.send_timeout(Event::Message(message), Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(acked.load(Ordering::SeqCst));

        stop.app_local.set();
        handle.join();
    }

    #[test]
    fn backoff_caps_at_sixty_seconds() {
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(10), Duration::from_secs(60));
    }

    #[test]
    fn failed_invoke_emits_full_error_record_to_error_flow() {
        let (in_tx, in_rx) = mpmc::bounded(4);
        let (err_tx, err_rx) = mpmc::bounded(4);
        let metrics = MetricsReporter::new().unwrap();
        let stop = CombinedStopSignal::new(
            conduit_traits::StopSignal::new(),
            conduit_traits::StopSignal::new(),
        );

        let config = ComponentRuntimeConfig {
            input_transforms: vec![],
            input_selection: None,
            next: None,
            error_flow: Some(err_tx),
            error_rate_limiter: None,
            monitoring_interval: Duration::from_secs(60),
        };

        let mut message = Message::new(json!({"x": 1}));
        message.topic = Some("t/opic".to_owned());
        message.user_properties.insert("k".to_owned(), json!("v"));

        let mut handle = spawn(Box::new(AlwaysFails), in_rx, config, labels(), metrics, stop.clone());
        in_tx.send_timeout(Event::Message(message), Duration::from_secs(1)).unwrap();

        let record = match err_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::Message(message) => message,
            other => panic!("expected Message, got {other:?}"),
        };

        assert_eq!(record.payload["error"]["text"], json!("boom"));
        assert_eq!(
            record.payload["location"],
            json!({"instance": "a", "flow": "f", "component": "c", "component_index": 0})
        );
        assert_eq!(
            record.payload["message"],
            json!({
                "payload": {"x": 1},
                "topic": "t/opic",
                "user_properties": {"k": "v"},
                "user_data": {},
                "previous": null,
            })
        );

        stop.app_local.set();
        handle.join();
    }
}
