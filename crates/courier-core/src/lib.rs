//! courier-core
//!
//! Distributed task execution core for a clustered mail platform: a durable
//! work queue layered over a message broker. Any node may enqueue
//! long-running asynchronous jobs (mailbox reindexing, quota notices, ...);
//! exactly one node in the cluster executes each job, and its progress and
//! terminal outcome are tracked independently of the transport.
//!
//! # Modules
//! - **domain**: task abstraction, identifiers, results, progress snapshots
//! - **serializer**: versioned task serialization and the codec registry
//! - **broker**: broker port, fixed topology, exclusive-consumer acquisition,
//!   in-memory broker for development and tests
//! - **queue**: the public work-queue port and its broker-backed
//!   implementation
//! - **worker**: worker executor / status tracker port and in-memory
//!   reference implementation
//! - **tasks**: reference task variants (reindexing, quota notification)
//!
//! # Delivery semantics
//! Deliveries are acknowledged to the broker *before* the task runs, so the
//! broker never duplicates execution of a long-running task. Past that point
//! the status tracker owns the task's fate; a crash between ack and
//! completion drops the task. See `queue::broker_queue` for the full
//! discussion.

pub mod broker;
pub mod domain;
pub mod queue;
pub mod serializer;
pub mod tasks;
pub mod worker;

pub use broker::{Broker, MemoryBroker};
pub use domain::{
    AdditionalInformation, Task, TaskError, TaskId, TaskResult, TaskType, TaskWithId,
};
pub use queue::{BrokerWorkQueue, WorkQueue, WorkQueueConfig};
pub use serializer::{TaskRegistry, TaskSerializer};
pub use worker::{MemoryTaskWorker, TaskManagerWorker};
