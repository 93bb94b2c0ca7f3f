// SPDX-License-Identifier: Apache-2.0

//! The `BrokerOutput` component (§4.5): a terminal sink that serializes `message.previous` and
//! publishes it, with TTL decrement/discard semantics and optional acknowledgement propagation.

use crate::codec;
use conduit_config::{PayloadEncoding, PayloadFormat};
use conduit_engine::expression;
use conduit_engine::{Component, ComponentError, ComponentErrorKind, Message, Scratch};
use conduit_traits::{BrokerAdapter, NackOutcome, SendContext, SendOutcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Configuration for a [`BrokerOutput`] instance.
#[derive(Debug, Clone)]
pub struct BrokerOutputConfig {
    /// Expression selecting the outgoing topic; falls back to `message.topic` when absent or when
    /// the expression resolves to `Null`.
    pub destination_expression: Option<String>,
    /// Transport encoding applied to the serialized payload.
    pub payload_encoding: PayloadEncoding,
    /// Structured format `message.previous` is serialized as.
    pub payload_format: PayloadFormat,
    /// Whether to copy the incoming message's user-properties onto the outgoing publish.
    pub copy_user_properties: bool,
    /// Whether to decrement a `ttl` user-property by one before publishing.
    pub decrement_ttl: bool,
    /// Whether to discard the message (acking the input) when `ttl <= 0` instead of publishing.
    pub discard_on_ttl_expiration: bool,
    /// Whether to defer acknowledgement until the broker confirms the publish, rather than acking
    /// as soon as `send_message` returns without error.
    pub propagate_acknowledgements: bool,
}

/// Terminal sink at the tail of a flow.
pub struct BrokerOutput {
    adapter: Arc<dyn BrokerAdapter>,
    config: BrokerOutputConfig,
}

impl BrokerOutput {
    /// Builds a new output stage bound to the given adapter.
    #[must_use]
    pub fn new(adapter: Arc<dyn BrokerAdapter>, config: BrokerOutputConfig) -> Self {
        Self { adapter, config }
    }

    fn resolve_destination(&self, message: &Message) -> Result<String, ComponentError> {
        if let Some(expr) = &self.config.destination_expression {
            let value = expression::evaluate(expr, message, &Scratch::empty())
                .map_err(|e| ComponentError::new(ComponentErrorKind::Configuration, e.to_string()))?;
            if let Some(topic) = value.as_str() {
                return Ok(topic.to_owned());
            }
        }
        message
            .topic
            .clone()
            .ok_or_else(|| ComponentError::new(ComponentErrorKind::Configuration, "broker_output has no destination topic"))
    }
}

impl Component for BrokerOutput {
    fn invoke(&mut self, _message: &mut Message, _data: Value) -> Result<Option<Value>, ComponentError> {
        // Terminal sink: the worker loop discards this result and calls `send_message` instead.
        Ok(None)
    }

    fn is_terminal_sink(&self) -> bool {
        true
    }

    fn send_message(&mut self, message: &mut Message) -> Result<(), ComponentError> {
        let ttl = message.user_properties.get("ttl").and_then(Value::as_i64);

        if self.config.discard_on_ttl_expiration {
            if let Some(t) = ttl {
                if t <= 0 {
                    message.call_acknowledgements();
                    return Ok(());
                }
            }
        }

        let mut out_properties = if self.config.copy_user_properties {
            message.user_properties.clone()
        } else {
            std::collections::HashMap::new()
        };
        if self.config.decrement_ttl {
            if let Some(t) = ttl {
                out_properties.insert("ttl".to_owned(), Value::from(t - 1));
            }
        }

        let destination = self.resolve_destination(message)?;
        let payload = codec::encode_payload(&message.previous, self.config.payload_encoding, self.config.payload_format)?;

        let owned = Arc::new(Mutex::new(Some(std::mem::replace(message, Message::new(Value::Null)))));

        if self.config.propagate_acknowledgements {
            let for_confirm = owned.clone();
            let send_context = SendContext {
                on_confirm: Box::new(move |outcome| {
                    if let Some(mut msg) = for_confirm.lock().take() {
                        match outcome {
                            SendOutcome::Accepted => msg.call_acknowledgements(),
                            SendOutcome::Failed => msg.call_negative_acknowledgements(NackOutcome::Failed),
                        }
                    }
                }),
            };
            match self.adapter.send_message(&destination, payload, out_properties, Some(send_context)) {
                Ok(()) => Ok(()),
                Err(error) => {
                    if let Some(mut msg) = owned.lock().take() {
                        msg.call_negative_acknowledgements(NackOutcome::Failed);
                    }
                    Err(ComponentError::new(ComponentErrorKind::Other, error.to_string()))
                }
            }
        } else {
            match self.adapter.send_message(&destination, payload, out_properties, None) {
                Ok(()) => {
                    if let Some(mut msg) = owned.lock().take() {
                        msg.call_acknowledgements();
                    }
                    Ok(())
                }
                Err(error) => {
                    if let Some(mut msg) = owned.lock().take() {
                        msg.call_negative_acknowledgements(NackOutcome::Failed);
                    }
                    Err(ComponentError::new(ComponentErrorKind::Other, error.to_string()))
                }
            }
        }
    }
}
