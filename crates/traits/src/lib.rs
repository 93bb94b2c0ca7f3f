// SPDX-License-Identifier: Apache-2.0

//! Shared capability traits for the connector runtime.
//!
//! The runtime crate (`conduit-engine`) and the broker crate (`conduit-broker`) both need to
//! speak to "something that looks like a broker adapter" or "something that looks like a
//! combined stop signal" without a hard dependency cycle between them. This crate holds those
//! informal interfaces as explicit Rust traits so both sides compile against a stable contract.

use std::collections::HashMap;
use std::time::Duration;

pub mod management;
pub mod signal;

pub use management::{ManagementEndpoint, ManagementRequest, ManagementSurface};
pub use signal::{CombinedStopSignal, StopSignal};

/// An opaque property value attached to a broker message.
///
/// Broker user-properties and message user-properties are string-keyed maps of scalars; this
/// mirrors that without dragging the full expression-engine value type into this crate.
pub type PropertyValue = serde_json::Value;

/// String-keyed user-properties, as carried on the wire by a broker message.
pub type UserProperties = HashMap<String, PropertyValue>;

/// Outcome passed to `nack` describing why a message was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The broker should treat the message as rejected (typically routed to a DMQ).
    Rejected,
    /// The broker should treat delivery as failed and may redeliver.
    Failed,
}

/// Outcome of a publish confirmation delivered to a `send_message` caller via `user_context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The broker has confirmed the publish.
    Accepted,
    /// The broker failed to confirm the publish.
    Failed,
}

/// Connection status of a broker adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerStatus {
    /// Not connected and not attempting to connect.
    #[default]
    Disconnected,
    /// An initial connection attempt is in flight.
    Connecting,
    /// A previously established connection is being re-established.
    Reconnecting,
    /// The adapter has a live session.
    Connected,
}

/// A message received from the broker, opaque apart from the fields the runtime needs.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Raw payload bytes as received off the wire.
    pub payload: Vec<u8>,
    /// The topic the message was published on.
    pub topic: String,
    /// User-properties carried alongside the payload.
    pub user_properties: UserProperties,
    /// Opaque receipt token the adapter uses to ack/nack this specific delivery.
    pub receipt: ReceiptToken,
}

/// An opaque per-delivery receipt handed back to the adapter on ack/nack.
///
/// Adapters mint their own tokens (e.g. a Solace message handle, or an index into the dev
/// broker's in-flight table); the runtime only ever threads it back through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptToken(pub u64);

/// Context threaded through `send_message` so the adapter can invoke the caller's publish
/// confirmation callback once the broker has durably accepted (or failed) the publish.
pub struct SendContext {
    /// Called exactly once, from whatever thread the adapter's confirmation machinery runs on.
    pub on_confirm: Box<dyn FnOnce(SendOutcome) + Send>,
}

impl std::fmt::Debug for SendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendContext").finish_non_exhaustive()
    }
}

/// Parameters for binding a component to a queue.
#[derive(Debug, Clone, Default)]
pub struct QueueBinding {
    /// Durable queue name. Ignored when `temporary` is set.
    pub queue_name: Option<String>,
    /// Topic subscriptions to attach to the queue at bind time.
    pub subscriptions: Vec<String>,
    /// Whether to create a temporary (non-durable) queue instead of binding a named one.
    pub temporary: bool,
    /// Maximum redelivery count before the broker dead-letters a message, if supported.
    pub max_redelivery: Option<u32>,
    /// Whether to provision the queue if it does not already exist.
    pub create_on_start: bool,
}

/// Errors surfaced by a broker adapter.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The adapter could not establish or re-establish a session.
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),
    /// A publish failed for a reason other than a dropped connection.
    #[error("broker publish failed: {0}")]
    PublishFailed(String),
    /// A queue bind/subscription operation failed.
    #[error("broker subscription operation failed: {0}")]
    SubscriptionFailed(String),
    /// The adapter is not connected and the operation requires a live session.
    #[error("broker adapter is not connected")]
    NotConnected,
}

/// Abstract driver implementing connect/receive/send/ack/nack against a concrete message broker
/// (or an in-process dev/test variant).
///
/// Every blocking operation accepts a timeout so callers can remain responsive to a shutdown
/// signal; implementations must never block indefinitely.
pub trait BrokerAdapter: Send + Sync {
    /// Establishes a session. Transitions `Disconnected -> Connecting -> Connected`, or back to
    /// `Disconnected` on a fatal failure.
    fn connect(&self) -> Result<(), BrokerError>;

    /// Tears down the session. Idempotent.
    fn disconnect(&self);

    /// Current connection status.
    fn status(&self) -> BrokerStatus;

    /// Declares/binds a durable or temporary queue, optionally with subscriptions.
    fn bind_to_queue(&self, binding: QueueBinding) -> Result<String, BrokerError>;

    /// Adds a topic subscription to an already-bound queue.
    fn add_topic_subscription(&self, queue_name: &str, topic: &str) -> Result<(), BrokerError>;

    /// Removes a topic subscription from an already-bound queue.
    fn remove_topic_subscription(&self, queue_name: &str, topic: &str) -> Result<(), BrokerError>;

    /// Returns one message from `queue_name`, or `None` on timeout.
    fn receive_message(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Publishes `payload` to `destination` with the given user-properties. `send_context`, when
    /// provided, is invoked once the broker confirms (or fails to confirm) the publish.
    fn send_message(
        &self,
        destination: &str,
        payload: Vec<u8>,
        user_properties: UserProperties,
        send_context: Option<SendContext>,
    ) -> Result<(), BrokerError>;

    /// Acknowledges successful processing of a previously received message.
    fn ack(&self, receipt: ReceiptToken);

    /// Negatively acknowledges a previously received message with the given outcome.
    fn nack(&self, receipt: ReceiptToken, outcome: NackOutcome);
}
