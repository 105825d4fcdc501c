//! In-memory broker for development and tests.
//!
//! Models the semantics the work queue depends on: durable queues that
//! survive `restart()`, exclusive consumption (one live channel per queue),
//! and redelivery of unacked messages to the next holder. Connection churn is
//! simulated with [`MemoryBroker::drop_consumer`] and
//! [`MemoryBroker::set_online`].
//!
//! Locking: one `std::sync::Mutex` around the whole broker state. Critical
//! sections are short and never held across an await; the only awaiting
//! operation is `recv` on the delivery channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BrokerError, Broker, Delivery, ExclusiveConsumerChannel, TopologySpec};

#[derive(Clone)]
struct StoredMessage {
    headers: HashMap<String, String>,
    payload: Vec<u8>,
}

struct Seat {
    consumer_id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct QueueState {
    /// Durable backlog, in enqueue order.
    ready: VecDeque<StoredMessage>,
    /// Delivered but not yet acked, keyed by delivery tag.
    unacked: HashMap<u64, StoredMessage>,
    consumer: Option<Seat>,
}

impl QueueState {
    /// Move unacked messages back to the front of the ready queue, oldest
    /// delivery first, and vacate the seat.
    fn revoke_consumer(&mut self) {
        self.consumer = None;
        let mut tags: Vec<u64> = self.unacked.keys().copied().collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(message) = self.unacked.remove(&tag) {
                self.ready.push_front(message);
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    online: bool,
    /// exchange -> (routing_key, queue) bindings.
    bindings: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, QueueState>,
    next_delivery_tag: u64,
    next_consumer_id: u64,
}

impl BrokerState {
    fn check_online(&self) -> Result<(), BrokerError> {
        if self.online {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("broker is offline".to_string()))
        }
    }

    /// Drain ready messages into the seated consumer, if any.
    fn pump(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        while let Some(seat) = &queue.consumer {
            if seat.tx.is_closed() {
                queue.revoke_consumer();
                return;
            }
            let Some(message) = queue.ready.pop_front() else {
                return;
            };
            self.next_delivery_tag += 1;
            let tag = self.next_delivery_tag;
            let delivery = Delivery {
                delivery_tag: tag,
                headers: message.headers.clone(),
                payload: message.payload.clone(),
            };
            queue.unacked.insert(tag, message);
            // Send cannot fail while is_closed() is false and we hold the lock.
            let _ = seat.tx.send(delivery);
        }
    }
}

/// See module docs.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                ..BrokerState::default()
            })),
        }
    }

    /// Simulate a broker restart: every consumer loses its rights, unacked
    /// messages are requeued, durable state (declarations and backlog)
    /// survives. The broker comes back online.
    pub fn restart(&self) {
        let mut state = self.state.lock().unwrap();
        state.online = true;
        for queue in state.queues.values_mut() {
            queue.revoke_consumer();
        }
    }

    /// Simulate the current holder crashing: its channel is revoked and
    /// unacked messages go back to the queue.
    pub fn drop_consumer(&self, queue_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.queues.get_mut(queue_name) {
            queue.revoke_consumer();
        }
    }

    /// Take the broker offline (connection loss) or back online. Going
    /// offline revokes all consumers.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.lock().unwrap();
        state.online = online;
        if !online {
            for queue in state.queues.values_mut() {
                queue.revoke_consumer();
            }
        }
    }

    /// Messages sitting in the durable backlog (not delivered, not acked).
    pub fn backlog(&self, queue_name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.queues.get(queue_name).map_or(0, |q| q.ready.len())
    }

    /// Delivered-but-unacked message count.
    pub fn unacked(&self, queue_name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.queues.get(queue_name).map_or(0, |q| q.unacked.len())
    }

    pub fn has_consumer(&self, queue_name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(queue_name)
            .and_then(|q| q.consumer.as_ref())
            .is_some_and(|seat| !seat.tx.is_closed())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_topology(&self, spec: &TopologySpec) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.check_online()?;

        state.queues.entry(spec.queue.clone()).or_default();
        let bindings = state.bindings.entry(spec.exchange.clone()).or_default();
        let binding = (spec.routing_key.clone(), spec.queue.clone());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.check_online()?;

        let bindings = state
            .bindings
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let targets: Vec<String> = bindings
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, queue)| queue.clone())
            .collect();

        for queue_name in targets {
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                queue.ready.push_back(StoredMessage {
                    headers: headers.clone(),
                    payload: payload.clone(),
                });
                state.pump(&queue_name);
            }
        }
        Ok(())
    }

    async fn consume_exclusive(
        &self,
        queue_name: &str,
    ) -> Result<Box<dyn ExclusiveConsumerChannel>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.check_online()?;

        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::UnknownQueue(queue_name.to_string()))?;

        match &queue.consumer {
            Some(seat) if !seat.tx.is_closed() => {
                return Err(BrokerError::ExclusiveRefused(queue_name.to_string()));
            }
            Some(_) => queue.revoke_consumer(),
            None => {}
        }

        state.next_consumer_id += 1;
        let consumer_id = state.next_consumer_id;
        let (tx, rx) = mpsc::unbounded_channel();
        // Seat again after the id bump; the borrow above ended.
        if let Some(queue) = state.queues.get_mut(queue_name) {
            queue.consumer = Some(Seat { consumer_id, tx });
        }
        state.pump(queue_name);

        Ok(Box::new(MemoryConsumerChannel {
            state: Arc::clone(&self.state),
            queue_name: queue_name.to_string(),
            consumer_id,
            rx,
        }))
    }
}

struct MemoryConsumerChannel {
    state: Arc<Mutex<BrokerState>>,
    queue_name: String,
    consumer_id: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl MemoryConsumerChannel {
    fn is_current_holder(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(&self.queue_name)
            .and_then(|q| q.consumer.as_ref())
            .is_some_and(|seat| seat.consumer_id == self.consumer_id)
    }

    fn release(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.queues.get_mut(&self.queue_name)
            && queue
                .consumer
                .as_ref()
                .is_some_and(|seat| seat.consumer_id == self.consumer_id)
        {
            queue.revoke_consumer();
        }
        self.rx.close();
    }
}

#[async_trait]
impl ExclusiveConsumerChannel for MemoryConsumerChannel {
    async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.recv().await?;
        // A delivery buffered from before a revocation must not be handed
        // out: it has already been requeued for the next holder.
        if self.is_current_holder() {
            Some(delivery)
        } else {
            None
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        let queue = state
            .queues
            .get_mut(&self.queue_name)
            .ok_or_else(|| BrokerError::UnknownQueue(self.queue_name.clone()))?;
        let holder = queue
            .consumer
            .as_ref()
            .is_some_and(|seat| seat.consumer_id == self.consumer_id);
        if !holder {
            return Err(BrokerError::Unavailable(
                "consumer channel no longer holds the queue".to_string(),
            ));
        }
        queue.unacked.remove(&delivery_tag);
        Ok(())
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for MemoryConsumerChannel {
    fn drop(&mut self) {
        self.release();
    }
}
