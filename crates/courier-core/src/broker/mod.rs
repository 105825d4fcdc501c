//! Broker port: topology, publishing, and exclusive consumption.
//!
//! The topology is fixed and identical for every node of the cluster: one
//! exchange, one durable queue, one binding. There is exactly one logical
//! work queue, not one per node.

pub mod consumer;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

pub use consumer::{ExclusiveConsumer, ReacquireBackoff};
pub use memory::MemoryBroker;

/// Cluster-wide broker object names. Constants, not per-node configuration.
pub const EXCHANGE_NAME: &str = "taskManagerWorkQueueExchange";
pub const QUEUE_NAME: &str = "taskManagerWorkQueue";
pub const ROUTING_KEY: &str = "taskManagerWorkQueueRoutingKey";

/// Required header on every delivery; carries the task id assigned at
/// submission. Absence means the producer and consumer disagree on the
/// message schema.
pub const TASK_ID_HEADER: &str = "taskId";

/// Size of the shared channel pool used for topology declaration and
/// publishing. Bounds concurrent publishes in flight.
pub const MAX_CHANNELS: usize = 1;

/// The broker objects the work queue relies on. Declaration is idempotent:
/// everything is created-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl TopologySpec {
    /// The one work-queue topology shared by the whole cluster.
    pub fn work_queue() -> Self {
        Self {
            exchange: EXCHANGE_NAME.to_string(),
            queue: QUEUE_NAME.to_string(),
            routing_key: ROUTING_KEY.to_string(),
        }
    }
}

/// One broker-borne message instance. Exists only for the duration of a
/// single receive/ack cycle; durability is the broker's concern.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Connection-level failure. Transient from the consumer's point of view
    /// (reconnection handles it); surfaced synchronously to publishers.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Another channel currently holds consumption rights on the queue.
    #[error("queue `{0}` already has an exclusive consumer")]
    ExclusiveRefused(String),

    #[error("unknown queue `{0}`")]
    UnknownQueue(String),

    #[error("unknown exchange `{0}`")]
    UnknownExchange(String),
}

/// Channel held by the current exclusive consumer.
///
/// `recv` yields deliveries in broker enqueue order. `None` means the channel
/// lost its rights (broker restart, connection loss) and the holder must
/// re-acquire. Deliveries must be acked explicitly; whatever is unacked when
/// the channel dies is redelivered to the next holder.
#[async_trait]
pub trait ExclusiveConsumerChannel: Send {
    async fn recv(&mut self) -> Option<Delivery>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Release consumption rights. Unacked deliveries go back to the queue.
    async fn close(&mut self);
}

/// Message-broker port.
///
/// The in-crate implementation is [`MemoryBroker`]; an AMQP adapter slots in
/// behind the same trait without touching the work queue.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotently ensure exchange, durable queue, and binding exist.
    async fn declare_topology(&self, spec: &TopologySpec) -> Result<(), BrokerError>;

    /// Publish durably. Resolves once the broker has confirmed receipt; on
    /// success the message survives a broker restart until consumed.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError>;

    /// Acquire sole consumption rights on the queue. At most one live channel
    /// per queue across the cluster; callers race, losers get
    /// [`BrokerError::ExclusiveRefused`] and retry.
    async fn consume_exclusive(
        &self,
        queue: &str,
    ) -> Result<Box<dyn ExclusiveConsumerChannel>, BrokerError>;
}
