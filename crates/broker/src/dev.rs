// SPDX-License-Identifier: Apache-2.0

//! An in-process broker adapter for development and tests (§4.3).
//!
//! Backed by queues keyed by name, each holding its own compiled subscription set. Publishing a
//! message fans it out to every queue whose subscriptions match the destination topic, the same
//! way a real topic-routed broker would. There is no network and no persistence: everything lives
//! in memory for the process lifetime.

use crate::wildcard::{CompiledSubscription, DEFAULT_DELIMITER};
use conduit_traits::{BrokerAdapter, BrokerError, BrokerMessage, BrokerStatus, NackOutcome, QueueBinding, ReceiptToken, SendContext, SendOutcome, UserProperties};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct QueueState {
    subscriptions: Vec<CompiledSubscription>,
    messages: VecDeque<BrokerMessage>,
    max_redelivery: Option<u32>,
}

struct InFlight {
    queue_name: String,
    message: BrokerMessage,
    redelivery_count: u32,
    max_redelivery: Option<u32>,
}

/// In-process `BrokerAdapter` used by simplified-app dev configurations and by this crate's own
/// integration tests.
pub struct DevBrokerAdapter {
    status: Mutex<BrokerStatus>,
    queues: Mutex<HashMap<String, QueueState>>,
    condvar: Condvar,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    next_receipt: AtomicU64,
    next_temp_queue: AtomicU64,
}

impl Default for DevBrokerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DevBrokerAdapter {
    /// Builds a fresh adapter with no queues and `Disconnected` status.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Mutex::new(BrokerStatus::Disconnected),
            queues: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
            in_flight: Mutex::new(HashMap::new()),
            next_receipt: AtomicU64::new(1),
            next_temp_queue: AtomicU64::new(1),
        }
    }

    fn mint_receipt(&self) -> u64 {
        self.next_receipt.fetch_add(1, Ordering::Relaxed)
    }
}

impl BrokerAdapter for DevBrokerAdapter {
    fn connect(&self) -> Result<(), BrokerError> {
        *self.status.lock() = BrokerStatus::Connecting;
        *self.status.lock() = BrokerStatus::Connected;
        Ok(())
    }

    fn disconnect(&self) {
        *self.status.lock() = BrokerStatus::Disconnected;
    }

    fn status(&self) -> BrokerStatus {
        *self.status.lock()
    }

    fn bind_to_queue(&self, binding: QueueBinding) -> Result<String, BrokerError> {
        let queue_name = if binding.temporary {
            format!("__temp_{}", self.next_temp_queue.fetch_add(1, Ordering::Relaxed))
        } else {
            binding
                .queue_name
                .clone()
                .ok_or_else(|| BrokerError::SubscriptionFailed("durable binding requires a queue_name".to_owned()))?
        };

        let subscriptions = binding
            .subscriptions
            .iter()
            .map(|pattern| CompiledSubscription::compile(pattern, DEFAULT_DELIMITER))
            .collect();

        self.queues.lock().entry(queue_name.clone()).or_insert(QueueState {
            subscriptions,
            messages: VecDeque::new(),
            max_redelivery: binding.max_redelivery,
        });

        Ok(queue_name)
    }

    fn add_topic_subscription(&self, queue_name: &str, topic: &str) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::SubscriptionFailed(format!("no such queue `{queue_name}`")))?;
        queue.subscriptions.push(CompiledSubscription::compile(topic, DEFAULT_DELIMITER));
        Ok(())
    }

    fn remove_topic_subscription(&self, queue_name: &str, topic: &str) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::SubscriptionFailed(format!("no such queue `{queue_name}`")))?;
        queue.subscriptions.retain(|sub| sub.pattern != topic);
        Ok(())
    }

    fn receive_message(&self, queue_name: &str, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if let Some(queue) = queues.get_mut(queue_name) {
                if let Some(message) = queue.messages.pop_front() {
                    self.in_flight.lock().insert(
                        message.receipt.0,
                        InFlight {
                            queue_name: queue_name.to_owned(),
                            message: message.clone(),
                            redelivery_count: 0,
                            max_redelivery: queue.max_redelivery,
                        },
                    );
                    return Ok(Some(message));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;
            let result = self.condvar.wait_for(&mut queues, remaining);
            if result.timed_out() {
                return Ok(None);
            }
        }
    }

    fn send_message(
        &self,
        destination: &str,
        payload: Vec<u8>,
        user_properties: UserProperties,
        send_context: Option<SendContext>,
    ) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock();
        let mut delivered = false;
        for queue in queues.values_mut() {
            if queue.subscriptions.iter().any(|sub| sub.matches(destination)) {
                let receipt = ReceiptToken(self.mint_receipt());
                queue.messages.push_back(BrokerMessage {
                    payload: payload.clone(),
                    topic: destination.to_owned(),
                    user_properties: user_properties.clone(),
                    receipt,
                });
                delivered = true;
            }
        }
        drop(queues);
        self.condvar.notify_all();

        let _ = delivered; // publish succeeds regardless of whether any subscriber matched
        if let Some(context) = send_context {
            (context.on_confirm)(SendOutcome::Accepted);
        }
        Ok(())
    }

    fn ack(&self, receipt: ReceiptToken) {
        self.in_flight.lock().remove(&receipt.0);
    }

    fn nack(&self, receipt: ReceiptToken, outcome: NackOutcome) {
        let mut in_flight = self.in_flight.lock();
        let Some(mut entry) = in_flight.remove(&receipt.0) else {
            return;
        };
        if matches!(outcome, NackOutcome::Rejected) {
            return;
        }
        entry.redelivery_count += 1;
        if let Some(max) = entry.max_redelivery {
            if entry.redelivery_count > max {
                return;
            }
        }
        drop(in_flight);
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&entry.queue_name) {
            queue.messages.push_back(entry.message);
        }
        drop(queues);
        self.condvar.notify_all();
    }
}
