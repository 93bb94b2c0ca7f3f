// SPDX-License-Identifier: Apache-2.0

//! The `BrokerInput` component (§4.4): a terminal source that polls a broker adapter's queue and
//! originates `Message` events instead of dequeuing them from a runtime-fed input queue.

use crate::codec;
use conduit_config::{PayloadEncoding, PayloadFormat};
use conduit_engine::{AckCallback, Component, ComponentError, Event, Message};
use conduit_traits::{BrokerAdapter, BrokerStatus, NackOutcome, ReceiptToken};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`BrokerInput`] instance.
#[derive(Debug, Clone)]
pub struct BrokerInputConfig {
    /// Name of the bound queue to poll.
    pub queue_name: String,
    /// Transport encoding applied to the raw wire bytes.
    pub payload_encoding: PayloadEncoding,
    /// Structured format the decoded bytes are parsed as.
    pub payload_format: PayloadFormat,
    /// Delimiter used to split the incoming topic into `input.topic_levels`.
    pub topic_delimiter: String,
}

/// Terminal source at the head of a flow: decodes broker messages into [`Message`]s and attaches
/// ack/nack callbacks that settle the original broker delivery.
pub struct BrokerInput {
    adapter: Arc<dyn BrokerAdapter>,
    config: BrokerInputConfig,
    active_subscriptions: Vec<String>,
    pending_ack: Option<ReceiptToken>,
}

impl BrokerInput {
    /// Builds a new input stage bound to the given adapter and queue.
    #[must_use]
    pub fn new(adapter: Arc<dyn BrokerAdapter>, config: BrokerInputConfig, initial_subscriptions: Vec<String>) -> Self {
        Self {
            adapter,
            config,
            active_subscriptions: initial_subscriptions,
            pending_ack: None,
        }
    }

    /// Adds a topic subscription to the bound queue, mutating `active_subscriptions`.
    pub fn add_subscription(&mut self, topic: &str) -> Result<(), conduit_traits::BrokerError> {
        self.adapter.add_topic_subscription(&self.config.queue_name, topic)?;
        self.active_subscriptions.push(topic.to_owned());
        Ok(())
    }

    /// Removes a topic subscription from the bound queue.
    pub fn remove_subscription(&mut self, topic: &str) -> Result<(), conduit_traits::BrokerError> {
        self.adapter.remove_topic_subscription(&self.config.queue_name, topic)?;
        self.active_subscriptions.retain(|s| s != topic);
        Ok(())
    }

    /// Topics currently subscribed through this stage.
    #[must_use]
    pub fn active_subscriptions(&self) -> &[String] {
        &self.active_subscriptions
    }
}

impl Component for BrokerInput {
    fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
        // Decoding already happened in `get_next_event`; this stage's `invoke` is a pass-through
        // so the worker loop's generic transform/selection/forwarding logic applies uniformly.
        Ok(Some(data))
    }

    fn get_next_event(&mut self, timeout: Duration) -> Option<Event> {
        let broker_message = match self.adapter.receive_message(&self.config.queue_name, timeout) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(%error, "broker_input receive_message failed");
                return None;
            }
        };

        let payload = match codec::decode_payload(&broker_message.payload, self.config.payload_encoding, self.config.payload_format) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(kind = %error.kind, detail = %error.message, "broker_input payload decode failed");
                self.adapter.nack(broker_message.receipt, NackOutcome::Rejected);
                return None;
            }
        };

        let mut message = Message::new(payload);
        message.topic = Some(broker_message.topic);
        message.topic_delimiter = self.config.topic_delimiter.clone();
        message.user_properties = broker_message.user_properties;

        let nack_adapter = self.adapter.clone();
        let nack_receipt = broker_message.receipt;
        message.add_nack_callback(Box::new(move |outcome| nack_adapter.nack(nack_receipt, outcome)));

        self.pending_ack = Some(broker_message.receipt);
        Some(Event::Message(message))
    }

    fn get_acknowledgement_callback(&mut self) -> Option<AckCallback> {
        let receipt = self.pending_ack.take()?;
        let adapter = self.adapter.clone();
        Some(Box::new(move || adapter.ack(receipt)))
    }

    fn get_connection_status(&self) -> Option<BrokerStatus> {
        Some(self.adapter.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::DevBrokerAdapter;
    use conduit_traits::QueueBinding;
    use serde_json::json;

    fn bound_adapter(subscriptions: &[&str]) -> (Arc<DevBrokerAdapter>, String) {
        let adapter = Arc::new(DevBrokerAdapter::new());
        let queue_name = adapter
            .bind_to_queue(QueueBinding {
                queue_name: Some("in".to_owned()),
                subscriptions: subscriptions.iter().map(|s| (*s).to_owned()).collect(),
                temporary: false,
                max_redelivery: None,
                create_on_start: true,
            })
            .unwrap();
        (adapter, queue_name)
    }

    #[test]
    fn get_next_event_decodes_and_wraps_a_broker_message() {
        let (adapter, queue_name) = bound_adapter(&["orders/*"]);
        adapter
            .send_message(
                "orders/created",
                serde_json::to_vec(&json!({"id": 1})).unwrap(),
                Default::default(),
                None,
            )
            .unwrap();

        let mut input = BrokerInput::new(
            adapter.clone() as Arc<dyn BrokerAdapter>,
            BrokerInputConfig {
                queue_name,
                payload_encoding: PayloadEncoding::None,
                payload_format: PayloadFormat::Json,
                topic_delimiter: "/".to_owned(),
            },
            vec!["orders/*".to_owned()],
        );

        let event = input.get_next_event(Duration::from_millis(100)).expect("event");
        match event {
            Event::Message(message) => {
                assert_eq!(message.payload, json!({"id": 1}));
                assert_eq!(message.topic.as_deref(), Some("orders/created"));
            }
            other => panic!("expected Message, got {other:?}"),
        }
        assert!(input.get_acknowledgement_callback().is_some());
    }

    #[test]
    fn timeout_with_no_message_returns_none() {
        let (adapter, queue_name) = bound_adapter(&["orders/*"]);
        let mut input = BrokerInput::new(
            adapter as Arc<dyn BrokerAdapter>,
            BrokerInputConfig {
                queue_name,
                payload_encoding: PayloadEncoding::None,
                payload_format: PayloadFormat::Json,
                topic_delimiter: "/".to_owned(),
            },
            vec![],
        );
        assert!(input.get_next_event(Duration::from_millis(20)).is_none());
    }
}
