//! Work queue: the public port other subsystems use to enqueue work.

pub mod broker_queue;

use std::time::Duration;

use async_trait::async_trait;

pub use broker_queue::BrokerWorkQueue;

use crate::broker::{BrokerError, ReacquireBackoff};
use crate::domain::{TaskId, TaskWithId};
use crate::serializer::SerializerError;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to serialize task: {0}")]
    Serialization(#[from] SerializerError),

    #[error("broker publish failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("broker did not confirm the publish within {0:?}")]
    Timeout(Duration),

    #[error("work queue is not started")]
    NotStarted,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    /// Cancellation of queued or running tasks is not supported. This is a
    /// deliberate gap: the error is loud on purpose, silently accepting and
    /// discarding a cancel request is not an option.
    #[error("cancel is not supported for task {0}")]
    NotSupported(TaskId),
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("work queue was already started")]
    AlreadyStarted,

    #[error("work queue is closed")]
    Closed,

    #[error("failed to declare broker topology: {0}")]
    Topology(#[from] BrokerError),
}

/// The sole boundary other parts of the platform use to enqueue work.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Serialize and publish a task durably. Fails synchronously on
    /// serialization or broker I/O failure; the caller decides whether to
    /// retry. On success the task survives a broker restart until consumed.
    async fn submit(&self, task: TaskWithId) -> Result<(), SubmitError>;

    /// Always fails with [`CancelError::NotSupported`].
    async fn cancel(&self, task_id: TaskId) -> Result<(), CancelError>;

    /// Declare topology and begin consuming. At most once per instance;
    /// submission is unusable until this completes.
    async fn start(&self) -> Result<(), StartError>;

    /// Release the consumer registration and broker channels. Idempotent and
    /// safe even if `start` was never called or failed partway.
    async fn close(&self);
}

/// Work queue configuration.
///
/// There is no `Default`: the concurrency bound must be chosen explicitly.
/// An unbounded default would let a burst of long-running tasks exhaust the
/// node, which is exactly the hazard the bound exists to prevent.
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Maximum number of task executions in flight on this node at once.
    pub max_concurrent_tasks: usize,

    /// How long `submit` waits for broker confirmation before failing.
    pub publish_timeout: Duration,

    /// Backoff bounds for exclusive-consumer reacquisition.
    pub reacquire_backoff: ReacquireBackoff,
}

impl WorkQueueConfig {
    /// Panics if `max_concurrent_tasks` is zero: a queue that can never hand
    /// a delivery off would consume work it cannot run.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        assert!(
            max_concurrent_tasks >= 1,
            "max_concurrent_tasks must be at least 1"
        );
        Self {
            max_concurrent_tasks,
            publish_timeout: Duration::from_secs(10),
            reacquire_backoff: ReacquireBackoff::default(),
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_reacquire_backoff(mut self, backoff: ReacquireBackoff) -> Self {
        self.reacquire_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "max_concurrent_tasks must be at least 1")]
    fn zero_concurrency_bound_is_rejected() {
        WorkQueueConfig::new(0);
    }

    #[test]
    fn builder_overrides_keep_the_bound() {
        let config = WorkQueueConfig::new(4).with_publish_timeout(Duration::from_secs(1));
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.publish_timeout, Duration::from_secs(1));
    }
}
