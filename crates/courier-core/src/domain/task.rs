//! The task abstraction: a polymorphic unit of asynchronous work.
//!
//! Two failure domains are kept deliberately separate:
//! - [`TaskResult`] is the *expected* terminal outcome of a run, including
//!   runs that finished with recoverable sub-failures (`Partial`).
//! - [`TaskError`] is the *unexpected* failure channel; it never travels
//!   through `TaskResult` and is reported out-of-band to the status tracker.
//!
//! Collapsing the two into one error type loses the distinction between "the
//! batch finished, one item was skipped" and "the task crashed".

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::task_type::TaskType;

/// Terminal outcome of a single execution.
///
/// Serialized as SCREAMING_SNAKE_CASE to match the wire/reporting convention:
/// `COMPLETED` / `PARTIAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    /// Fully succeeded.
    Completed,

    /// Finished, but with recoverable sub-failures (e.g. one item of a batch
    /// could not be processed).
    Partial,
}

impl TaskResult {
    /// Combine two outcomes: `Partial` absorbs. Batch tasks use this to fold
    /// per-item results into one terminal outcome.
    pub fn combine(self, other: TaskResult) -> TaskResult {
        match (self, other) {
            (TaskResult::Completed, TaskResult::Completed) => TaskResult::Completed,
            _ => TaskResult::Partial,
        }
    }
}

/// Unexpected execution failure.
///
/// This is the "exception" channel: a task that returns `Err(TaskError)` never
/// produced a [`TaskResult`], and the worker reports it to the status tracker
/// via `fail` instead.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Immutable, timestamped snapshot of a task's progress.
///
/// Observability only, never control: watchers may query it at any time while
/// the task runs, and producing it must not block execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInformation {
    timestamp: DateTime<Utc>,
    properties: serde_json::Value,
}

impl AdditionalInformation {
    /// Snapshot the given properties at the current instant.
    pub fn new(properties: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            properties,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn properties(&self) -> &serde_json::Value {
        &self.properties
    }
}

/// A polymorphic unit of work.
///
/// A task's fields are fully determined by its constructor arguments; it
/// carries no hidden mutable global state. Progress that `details` reports is
/// kept in cheap internal synchronization (atomics, small locks) so `details`
/// can be called concurrently with `run`.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Execute the task.
    ///
    /// `Ok` for both full and partial completion; `Err` only for unexpected
    /// failure (see module docs on the two failure domains).
    async fn run(&self) -> Result<TaskResult, TaskError>;

    /// The variant tag this task serializes under.
    fn task_type(&self) -> TaskType;

    /// Latest progress snapshot, if the variant exposes one.
    fn details(&self) -> Option<AdditionalInformation> {
        None
    }

    /// Downcast seam for the serializer registry (type-erasure pattern: the
    /// registered codec recovers the concrete type from `&dyn Task`).
    fn as_any(&self) -> &dyn Any;
}

/// Immutable pairing of a [`TaskId`] and a [`Task`]: the unit moved across the
/// boundary between submission and execution.
#[derive(Clone)]
pub struct TaskWithId {
    id: TaskId,
    task: Arc<dyn Task>,
}

impl TaskWithId {
    pub fn new(id: TaskId, task: Arc<dyn Task>) -> Self {
        Self { id, task }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }
}

impl fmt::Debug for TaskWithId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWithId")
            .field("id", &self.id)
            .field("task_type", &self.task.task_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn task_result_serializes_as_required_names() {
        let s = serde_json::to_string(&TaskResult::Completed).unwrap();
        assert_eq!(s, "\"COMPLETED\"");

        let s = serde_json::to_string(&TaskResult::Partial).unwrap();
        assert_eq!(s, "\"PARTIAL\"");
    }

    #[rstest]
    #[case(TaskResult::Completed, TaskResult::Completed, TaskResult::Completed)]
    #[case(TaskResult::Completed, TaskResult::Partial, TaskResult::Partial)]
    #[case(TaskResult::Partial, TaskResult::Completed, TaskResult::Partial)]
    #[case(TaskResult::Partial, TaskResult::Partial, TaskResult::Partial)]
    fn partial_absorbs_when_combining(
        #[case] left: TaskResult,
        #[case] right: TaskResult,
        #[case] expected: TaskResult,
    ) {
        assert_eq!(left.combine(right), expected);
    }

    #[test]
    fn additional_information_is_timestamped() {
        let before = Utc::now();
        let info = AdditionalInformation::new(serde_json::json!({"mailboxId": "M1"}));
        let after = Utc::now();

        assert!(info.timestamp() >= before && info.timestamp() <= after);
        assert_eq!(info.properties()["mailboxId"], "M1");
    }

    #[test]
    fn task_error_carries_its_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = TaskError::with_source("storage unavailable", io);
        assert_eq!(err.to_string(), "storage unavailable");
        assert!(std::error::Error::source(&err).is_some());
    }
}
