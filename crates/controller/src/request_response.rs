// SPDX-License-Identifier: Apache-2.0

//! The request/response controller (§4.6): lets a component issue a broker request and await a
//! correlated reply, or stream of replies, as if it were a synchronous call.
//!
//! A controller owns one requestor identity: a UUID it subscribes under, on a queue a single
//! reader thread drains. Pending calls are tracked in a small table keyed by `request_id`, each
//! entry carrying the reply channel plus enough bookkeeping (`stream`,
//! `streaming_complete_expression`) for the reader to know when a reply completes the call. The
//! table's shape mirrors [`conduit_engine::CacheService`] (mutex-guarded map, per-entry TTL,
//! nearest-deadline sweep) rather than reusing it directly, since an entry here carries a live
//! reply sender that a `serde_json::Value`-typed cache has no way to hold.

use conduit_broker::codec;
use conduit_channel::error::RecvTimeoutError;
use conduit_channel::mpsc;
use conduit_config::{PayloadEncoding, PayloadFormat, RequestResponseConfig};
use conduit_engine::{
    ComponentError, ComponentErrorKind, Message, RequestOptions, RequestResponseClient, ResponseChunk, ResponseReceiver,
};
use conduit_traits::{BrokerAdapter, BrokerError, NackOutcome, QueueBinding};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// User-properties key carrying the topic a reply should be published to.
pub const RESPONSE_TOPIC_KEY: &str = "__conduit_broker_request_response_topic__";
/// User-properties key carrying the JSON-encoded metadata stack (for nested request/response).
pub const REPLY_METADATA_KEY: &str = "__conduit_broker_request_reply_metadata__";

const READER_POLL: Duration = Duration::from_millis(500);
const CHUNK_SEND_TIMEOUT: Duration = Duration::from_secs(5);

struct PendingEntry {
    reply_tx: mpsc::Sender<ResponseChunk>,
    stream: bool,
    streaming_complete_expression: Option<String>,
    ttl: Duration,
    expiry: Instant,
}

#[derive(Clone)]
struct PendingLookup {
    reply_tx: mpsc::Sender<ResponseChunk>,
    stream: bool,
    streaming_complete_expression: Option<String>,
}

#[derive(Default)]
struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    fn insert(&self, request_id: String, entry: PendingEntry) {
        self.entries.lock().insert(request_id, entry);
    }

    fn lookup(&self, request_id: &str) -> Option<PendingLookup> {
        let entries = self.entries.lock();
        entries.get(request_id).map(|e| PendingLookup {
            reply_tx: e.reply_tx.clone(),
            stream: e.stream,
            streaming_complete_expression: e.streaming_complete_expression.clone(),
        })
    }

    fn touch(&self, request_id: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(request_id) {
            entry.expiry = Instant::now() + entry.ttl;
        }
    }

    fn remove(&self, request_id: &str) {
        self.entries.lock().remove(request_id);
    }

    /// Drops every entry whose deadline has passed, closing its reply channel. A caller still
    /// polling via [`BrokerResponseReceiver::recv`] sees the channel close and reports a timeout
    /// of its own accord; this only reclaims entries nobody is polling any more.
    fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, entry| entry.expiry > now);
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn read_metadata_stack(user_properties: &HashMap<String, Value>) -> Vec<Value> {
    user_properties
        .get(REPLY_METADATA_KEY)
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Drives one requestor identity's reply queue and matches replies back to pending calls.
pub struct BrokerRequestResponseController {
    adapter: Arc<dyn BrokerAdapter>,
    response_topic: String,
    request_expiry: Duration,
    response_topic_insertion_expression: Option<String>,
    payload_encoding: PayloadEncoding,
    payload_format: PayloadFormat,
    pending: Arc<PendingTable>,
    stopped: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerRequestResponseController {
    /// Binds a temporary reply queue under `config.response_topic_prefix` and starts the reader
    /// thread. `adapter` must already be connected.
    pub fn start(adapter: Arc<dyn BrokerAdapter>, config: &RequestResponseConfig) -> Result<Self, BrokerError> {
        let requestor_id = Uuid::new_v4();
        let response_topic = format!("{}/{}/{}", config.response_topic_prefix, requestor_id, config.response_topic_suffix);

        let queue_name = adapter.bind_to_queue(QueueBinding {
            queue_name: None,
            subscriptions: vec![response_topic.clone(), format!("{response_topic}/>")],
            temporary: true,
            max_redelivery: None,
            create_on_start: true,
        })?;

        let pending = Arc::new(PendingTable::default());
        let stopped = Arc::new(AtomicBool::new(false));

        let reader_thread = {
            let adapter = adapter.clone();
            let pending = pending.clone();
            let stopped = stopped.clone();
            let payload_encoding = config.broker.payload_encoding;
            let payload_format = config.broker.payload_format;
            std::thread::Builder::new()
                .name(format!("conduit-reqres-{requestor_id}"))
                .spawn(move || reader_loop(adapter, queue_name, payload_encoding, payload_format, pending, stopped))
                .expect("failed to spawn request/response reader thread")
        };

        Ok(Self {
            adapter,
            response_topic,
            request_expiry: config.request_expiry_ms,
            response_topic_insertion_expression: config.response_topic_insertion_expression.clone(),
            payload_encoding: config.broker.payload_encoding,
            payload_format: config.broker.payload_format,
            pending,
            stopped,
            reader_thread: Mutex::new(Some(reader_thread)),
        })
    }

    /// The topic this controller's replies are expected on. Exposed for session status snapshots.
    #[must_use]
    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Stops the reader thread and joins it. Idempotent.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Looks up `config.broker.broker_type`, connects a fresh adapter instance, and starts a
/// [`BrokerRequestResponseController`] over it. One requestor identity and reply queue per call:
/// a component group shares one (see [`crate::flow::build`]); the session registry mints one per
/// session.
pub fn start_controller(
    config: &conduit_config::RequestResponseConfig,
) -> Result<Arc<BrokerRequestResponseController>, crate::error::Error> {
    let factory = conduit_broker::lookup_broker_adapter(&config.broker.broker_type)
        .ok_or_else(|| crate::error::Error::UnknownBrokerType(config.broker.broker_type.clone()))?;
    let adapter = (factory.create)(&config.broker.broker_config)?;
    adapter.connect()?;
    Ok(Arc::new(BrokerRequestResponseController::start(adapter, config)?))
}

/// Same as [`start_controller`], but returns the trait object a component's
/// `attach_request_response` stores rather than the concrete type.
pub fn build_client(
    config: &conduit_config::RequestResponseConfig,
) -> Result<Arc<dyn RequestResponseClient>, crate::error::Error> {
    Ok(start_controller(config)?)
}

impl Drop for BrokerRequestResponseController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RequestResponseClient for BrokerRequestResponseController {
    fn request(&self, mut message: Message, options: RequestOptions) -> Result<Box<dyn ResponseReceiver>, ComponentError> {
        let request_id = Uuid::new_v4().to_string();

        let mut stack = read_metadata_stack(&message.user_properties);
        stack.push(json!({"request_id": request_id, "response_topic": self.response_topic}));
        let stack_json = serde_json::to_string(&stack)
            .map_err(|e| ComponentError::new(ComponentErrorKind::Other, format!("failed to encode reply metadata: {e}")))?;
        message.user_properties.insert(REPLY_METADATA_KEY.to_owned(), Value::String(stack_json));
        message
            .user_properties
            .insert(RESPONSE_TOPIC_KEY.to_owned(), Value::String(self.response_topic.clone()));

        if let Some(expr) = &self.response_topic_insertion_expression {
            message
                .set_data(expr, Value::String(self.response_topic.clone()))
                .map_err(|e| ComponentError::new(ComponentErrorKind::Configuration, e.to_string()))?;
        }

        let capacity = if options.stream { 32 } else { 1 };
        let (reply_tx, reply_rx) = mpsc::bounded(capacity);
        self.pending.insert(
            request_id.clone(),
            PendingEntry {
                reply_tx,
                stream: options.stream,
                streaming_complete_expression: options.streaming_complete_expression,
                ttl: self.request_expiry,
                expiry: Instant::now() + self.request_expiry,
            },
        );

        let destination = message
            .topic
            .clone()
            .ok_or_else(|| ComponentError::configuration("broker request/response call has no destination topic"))?;
        let payload = codec::encode_payload(&message.payload, self.payload_encoding, self.payload_format)?;

        if let Err(error) = self
            .adapter
            .send_message(&destination, payload, message.user_properties.clone(), None)
        {
            self.pending.remove(&request_id);
            return Err(ComponentError::new(ComponentErrorKind::Other, error.to_string()));
        }

        Ok(Box::new(BrokerResponseReceiver { rx: reply_rx }))
    }
}

struct BrokerResponseReceiver {
    rx: mpsc::Receiver<ResponseChunk>,
}

impl ResponseReceiver for BrokerResponseReceiver {
    fn recv(&mut self, timeout: Duration) -> Result<Option<ResponseChunk>, ComponentError> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Closed) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(ComponentError::new(
                ComponentErrorKind::Other,
                format!("request/response call timed out after {timeout:?}"),
            )),
        }
    }
}

fn reader_loop(
    adapter: Arc<dyn BrokerAdapter>,
    queue_name: String,
    payload_encoding: PayloadEncoding,
    payload_format: PayloadFormat,
    pending: Arc<PendingTable>,
    stopped: Arc<AtomicBool>,
) {
    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        pending.sweep_expired();

        let broker_message = match adapter.receive_message(&queue_name, READER_POLL) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(%error, "request/response reader receive_message failed");
                continue;
            }
        };

        let payload = match codec::decode_payload(&broker_message.payload, payload_encoding, payload_format) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(kind = %error.kind, detail = %error.message, "request/response reply payload decode failed");
                adapter.nack(broker_message.receipt, NackOutcome::Rejected);
                continue;
            }
        };

        let mut user_properties = broker_message.user_properties;
        let mut stack = read_metadata_stack(&user_properties);
        let Some(frame) = stack.pop() else {
            tracing::warn!("reply carried no request/reply metadata frame, dropping");
            adapter.ack(broker_message.receipt);
            continue;
        };
        let Some(request_id) = frame.get("request_id").and_then(Value::as_str).map(str::to_owned) else {
            tracing::warn!("reply metadata frame is missing request_id, dropping");
            adapter.ack(broker_message.receipt);
            continue;
        };

        if stack.is_empty() {
            user_properties.remove(REPLY_METADATA_KEY);
            user_properties.remove(RESPONSE_TOPIC_KEY);
        } else {
            if let Ok(encoded) = serde_json::to_string(&stack) {
                user_properties.insert(REPLY_METADATA_KEY.to_owned(), Value::String(encoded));
            }
            if let Some(enclosing) = stack.last().and_then(|f| f.get("response_topic")).and_then(Value::as_str) {
                user_properties.insert(RESPONSE_TOPIC_KEY.to_owned(), Value::String(enclosing.to_owned()));
            }
        }

        let mut reply = Message::new(payload);
        reply.topic = Some(broker_message.topic);
        reply.user_properties = user_properties;
        adapter.ack(broker_message.receipt);

        let Some(entry) = pending.lookup(&request_id) else {
            tracing::debug!(request_id = %request_id, "late reply after request expiry, dropping");
            continue;
        };

        let is_last = if entry.stream {
            entry
                .streaming_complete_expression
                .as_deref()
                .map(|expr| reply.get_data(expr).map(|v| truthy(&v)).unwrap_or(false))
                .unwrap_or(false)
        } else {
            true
        };

        let chunk = ResponseChunk { message: reply, is_last };
        let delivered = entry.reply_tx.send_timeout(chunk, CHUNK_SEND_TIMEOUT).is_ok();

        if delivered && !is_last {
            pending.touch(&request_id);
        } else {
            pending.remove(&request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_broker::dev::DevBrokerAdapter;
    use conduit_config::BrokerConfig;
    use serde_json::json;
    use std::time::Duration;

    fn config(prefix: &str) -> RequestResponseConfig {
        RequestResponseConfig {
            broker: BrokerConfig {
                broker_type: "dev".to_owned(),
                queue_name: None,
                subscriptions: vec![],
                max_redelivery: None,
                create_queue_on_start: true,
                broker_config: conduit_config::ConfigTree::Null,
                payload_encoding: PayloadEncoding::None,
                payload_format: PayloadFormat::Json,
            },
            response_topic_prefix: prefix.to_owned(),
            response_topic_suffix: "res".to_owned(),
            request_expiry_ms: Duration::from_millis(300),
            response_topic_insertion_expression: None,
            max_sessions: None,
        }
    }

    #[test]
    fn round_trips_a_single_reply() {
        let adapter = Arc::new(DevBrokerAdapter::new());
        adapter.connect().unwrap();
        // Stand-in for the replying service: a queue subscribed to the request topic, so the
        // test can read back exactly what the controller published (request_id + reply topic).
        adapter
            .bind_to_queue(QueueBinding {
                queue_name: Some("service-inbox".to_owned()),
                subscriptions: vec!["service/do-thing".to_owned()],
                temporary: false,
                max_redelivery: None,
                create_on_start: true,
            })
            .unwrap();

        let controller = BrokerRequestResponseController::start(adapter.clone(), &config("responses/app")).unwrap();

        let mut request = Message::new(json!({"q": 1}));
        request.topic = Some("service/do-thing".to_owned());
        let mut receiver = controller.request(request, RequestOptions::default()).unwrap();

        let inbound = adapter
            .receive_message("service-inbox", Duration::from_millis(200))
            .unwrap()
            .expect("the request was published");
        adapter.ack(inbound.receipt);

        let stack: Vec<Value> = inbound
            .user_properties
            .get(REPLY_METADATA_KEY)
            .and_then(Value::as_str)
            .map(|s| serde_json::from_str(s).unwrap())
            .unwrap();
        let request_id = stack[0]["request_id"].as_str().unwrap().to_owned();
        let response_topic = inbound
            .user_properties
            .get(RESPONSE_TOPIC_KEY)
            .and_then(Value::as_str)
            .unwrap()
            .to_owned();

        let mut reply_properties = HashMap::new();
        reply_properties.insert(
            REPLY_METADATA_KEY.to_owned(),
            Value::String(serde_json::to_string(&vec![json!({"request_id": request_id})]).unwrap()),
        );
        adapter
            .send_message(
                &response_topic,
                serde_json::to_vec(&json!({"answer": 42})).unwrap(),
                reply_properties,
                None,
            )
            .unwrap();

        let chunk = receiver.recv(Duration::from_secs(1)).unwrap().expect("a reply");
        assert!(chunk.is_last);
        assert_eq!(chunk.message.payload, json!({"answer": 42}));

        controller.shutdown();
    }

    #[test]
    fn missing_reply_times_out() {
        let adapter = Arc::new(DevBrokerAdapter::new());
        adapter.connect().unwrap();
        let controller = BrokerRequestResponseController::start(adapter, &config("responses/app2")).unwrap();

        let mut request = Message::new(json!({}));
        request.topic = Some("service/silent".to_owned());
        let mut receiver = controller.request(request, RequestOptions::default()).unwrap();

        let result = receiver.recv(Duration::from_millis(100));
        assert!(result.is_err());
        controller.shutdown();
    }
}
