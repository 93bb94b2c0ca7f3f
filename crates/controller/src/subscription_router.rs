// SPDX-License-Identifier: Apache-2.0

//! `SubscriptionRouter` (§4.7): the internal component a simplified app synthesizes ahead of its
//! user components when it declares two or more of them. Given the topic of each incoming
//! message, it finds the first user component (in declaration order) whose subscriptions match
//! and enqueues the event directly onto that component's input queue, bypassing the rest of the
//! chain entirely.

use conduit_broker::wildcard::CompiledSubscription;
use conduit_channel::error::SendError;
use conduit_channel::mpmc::Sender;
use conduit_engine::{Component, ComponentError, ComponentErrorKind, Event, Message};
use conduit_traits::CombinedStopSignal;
use serde_json::Value;
use std::time::Duration;

/// How long the router retries a full target queue before giving up and nacking the message.
const ROUTE_TIMEOUT: Duration = Duration::from_secs(5);
const ROUTE_POLL: Duration = Duration::from_millis(500);

/// One user component the router can dispatch to.
pub struct RouteTarget {
    /// Compiled subscriptions for this target, checked in the router's declared order.
    pub subscriptions: Vec<CompiledSubscription>,
    /// The target component group's shared input queue.
    pub sender: Sender<Event>,
}

/// Routes each incoming message to the first matching user component's input queue.
pub struct SubscriptionRouter {
    targets: Vec<RouteTarget>,
    stop_signal: CombinedStopSignal,
}

impl SubscriptionRouter {
    /// Builds a router dispatching across `targets` in declaration order.
    #[must_use]
    pub fn new(targets: Vec<RouteTarget>, stop_signal: CombinedStopSignal) -> Self {
        Self { targets, stop_signal }
    }

    fn find_target(&self, topic: &str) -> Option<usize> {
        self.targets
            .iter()
            .position(|target| target.subscriptions.iter().any(|sub| sub.matches(topic)))
    }
}

fn take_message(event: Event) -> Message {
    match event {
        Event::Message(message) => message,
        // The router only ever enqueues `Event::Message`, so the channel only ever hands one back.
        _ => unreachable!("subscription router only forwards Message events"),
    }
}

impl Component for SubscriptionRouter {
    fn invoke(&mut self, _message: &mut Message, _data: Value) -> Result<Option<Value>, ComponentError> {
        Ok(None)
    }

    fn is_terminal_sink(&self) -> bool {
        true
    }

    fn send_message(&mut self, message: &mut Message) -> Result<(), ComponentError> {
        let topic = message.topic.clone().unwrap_or_default();
        let Some(index) = self.find_target(&topic) else {
            message.call_acknowledgements();
            return Ok(());
        };

        let mut event = Event::Message(std::mem::replace(message, Message::new(Value::Null)));
        let deadline = std::time::Instant::now() + ROUTE_TIMEOUT;
        loop {
            match self.targets[index].sender.send_timeout(event, ROUTE_POLL) {
                Ok(()) => return Ok(()),
                Err(err @ SendError::Closed(_)) => {
                    *message = take_message(err.into_inner());
                    return Err(ComponentError::new(ComponentErrorKind::Other, "subscription router target queue is closed"));
                }
                Err(SendError::Timeout(returned)) => {
                    if self.stop_signal.is_set() || std::time::Instant::now() >= deadline {
                        *message = take_message(returned);
                        return Err(ComponentError::new(ComponentErrorKind::Shutdown, "subscription router target queue is full"));
                    }
                    event = returned;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_channel::mpmc;
    use conduit_traits::StopSignal;

    fn stop() -> CombinedStopSignal {
        CombinedStopSignal::new(StopSignal::new(), StopSignal::new())
    }

    #[test]
    fn routes_to_first_matching_target_in_order() {
        let (tx_a, rx_a) = mpmc::bounded(4);
        let (tx_b, rx_b) = mpmc::bounded(4);
        let targets = vec![
            RouteTarget {
                subscriptions: vec![CompiledSubscription::compile("orders/*", "/")],
                sender: tx_a,
            },
            RouteTarget {
                subscriptions: vec![CompiledSubscription::compile(">", "/")],
                sender: tx_b,
            },
        ];
        let mut router = SubscriptionRouter::new(targets, stop());

        let mut message = Message::new(Value::Null);
        message.topic = Some("orders/created".to_owned());
        router.send_message(&mut message).unwrap();

        assert!(rx_a.recv_timeout(Duration::from_millis(100)).is_ok());
        assert!(rx_b.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn unmatched_topic_is_discarded_and_acked() {
        let (tx_a, _rx_a) = mpmc::bounded(4);
        let targets = vec![RouteTarget {
            subscriptions: vec![CompiledSubscription::compile("orders/*", "/")],
            sender: tx_a,
        }];
        let mut router = SubscriptionRouter::new(targets, stop());

        let mut message = Message::new(Value::Null);
        message.topic = Some("shipments/created".to_owned());
        let acked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acked2 = acked.clone();
        message.add_ack_callback(Box::new(move || acked2.store(true, std::sync::atomic::Ordering::SeqCst)));

        router.send_message(&mut message).unwrap();
        assert!(acked.load(std::sync::atomic::Ordering::SeqCst));
    }
}
