// SPDX-License-Identifier: Apache-2.0

//! The `Message` envelope carried through a flow, and the ack/nack callback chain attached to it.

use crate::error::ExprError;
use crate::expression::{self, Scratch};
use conduit_traits::NackOutcome;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A callback invoked exactly once when a message is finally acknowledged.
pub type AckCallback = Box<dyn FnOnce() + Send>;
/// A callback invoked exactly once when a message is finally negatively acknowledged.
pub type NackCallback = Box<dyn FnOnce(NackOutcome) + Send>;

/// The envelope a component's `invoke()` receives and may transform, per SPEC_FULL.md's data
/// model. Scratch fields (`invoke_data`, `iteration_data`) are addressable via expressions but
/// carry no meaning of their own — components and transforms assign it.
pub struct Message {
    /// The structured (or opaque, for undecoded broker input) body of the message.
    pub payload: Value,
    /// The topic the message arrived on or will be published to, if any.
    pub topic: Option<String>,
    /// Delimiter used to split `topic` into `input.topic_levels`.
    pub topic_delimiter: String,
    /// Broker/application metadata attached to the message.
    pub user_properties: HashMap<String, Value>,
    /// The result of the previous component's `invoke()`, addressable via `previous:`.
    pub previous: Value,
    /// Free-form per-flow scratch space, namespaced by name (`user_data.<name>:`).
    pub user_data: Value,
    /// Scratch written by `invoke:` directive argument binding.
    pub invoke_data: Value,
    /// Scratch written by iteration transforms (`map`/`filter`/`reduce`/`copy_list_item`).
    pub iteration_data: Value,

    ack_callbacks: Vec<AckCallback>,
    nack_callbacks: Vec<NackCallback>,
    settled: bool,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload)
            .field("topic", &self.topic)
            .field("user_properties", &self.user_properties)
            .field("previous", &self.previous)
            .field("user_data", &self.user_data)
            .field("ack_callbacks", &self.ack_callbacks.len())
            .field("nack_callbacks", &self.nack_callbacks.len())
            .finish()
    }
}

impl Message {
    /// Builds a new message around a payload, with empty scratch and no ack chain.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            topic: None,
            topic_delimiter: "/".to_owned(),
            user_properties: HashMap::new(),
            previous: Value::Null,
            user_data: Value::Object(serde_json::Map::new()),
            invoke_data: Value::Null,
            iteration_data: Value::Null,
            ack_callbacks: Vec::new(),
            nack_callbacks: Vec::new(),
            settled: false,
        }
    }

    /// Evaluates an expression against this message with no iteration scratch bound.
    pub fn get_data(&self, expr: &str) -> Result<Value, ExprError> {
        expression::evaluate(expr, self, &Scratch::empty())
    }

    /// Evaluates an expression against this message with explicit iteration scratch.
    pub fn get_data_with_scratch(&self, expr: &str, scratch: &Scratch) -> Result<Value, ExprError> {
        expression::evaluate(expr, self, scratch)
    }

    /// Writes a value to the location addressed by an expression.
    pub fn set_data(&mut self, expr: &str, value: Value) -> Result<(), ExprError> {
        expression::assign(expr, self, value)
    }

    /// Registers a callback to run once this message is finally acknowledged.
    pub fn add_ack_callback(&mut self, callback: AckCallback) {
        self.ack_callbacks.push(callback);
    }

    /// Registers a callback to run once this message is finally negatively acknowledged.
    pub fn add_nack_callback(&mut self, callback: NackCallback) {
        self.nack_callbacks.push(callback);
    }

    /// Runs every registered ack callback exactly once. A second call is a no-op (logged), since
    /// it indicates a component double-acked a message.
    pub fn call_acknowledgements(&mut self) {
        if self.settled {
            tracing::warn!("message acknowledged more than once");
            return;
        }
        self.settled = true;
        for callback in self.ack_callbacks.drain(..) {
            callback();
        }
        self.nack_callbacks.clear();
    }

    /// Runs every registered nack callback exactly once with the given outcome.
    pub fn call_negative_acknowledgements(&mut self, outcome: NackOutcome) {
        if self.settled {
            tracing::warn!("message nacked after already being settled");
            return;
        }
        self.settled = true;
        for callback in self.nack_callbacks.drain(..) {
            callback(outcome);
        }
        self.ack_callbacks.clear();
    }

    /// Merges this message's ack callbacks onto `other`, transferring ack responsibility (e.g.
    /// from an inbound broker message onto a synthesized reply message).
    pub fn combine_with_message(&mut self, other: &mut Message) {
        other.ack_callbacks.append(&mut self.ack_callbacks);
        self.settled = true;
    }

    /// `true` once `call_acknowledgements`/`call_negative_acknowledgements` has run.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn ack_callbacks_run_exactly_once() {
        let mut m = Message::new(json!({}));
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        m.add_ack_callback(Box::new(move || *count2.lock() += 1));
        m.call_acknowledgements();
        m.call_acknowledgements();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn nack_callbacks_receive_outcome() {
        let mut m = Message::new(json!({}));
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        m.add_nack_callback(Box::new(move |outcome| *seen2.lock() = Some(outcome)));
        m.call_negative_acknowledgements(NackOutcome::Failed);
        assert_eq!(*seen.lock(), Some(NackOutcome::Failed));
    }

    #[test]
    fn combine_with_message_transfers_ack_chain() {
        let mut inbound = Message::new(json!({}));
        let mut reply = Message::new(json!({}));
        let fired = Arc::new(Mutex::new(false));
        let fired2 = fired.clone();
        inbound.add_ack_callback(Box::new(move || *fired2.lock() = true));
        inbound.combine_with_message(&mut reply);
        reply.call_acknowledgements();
        assert!(*fired.lock());
    }
}
