//! Worker executor / status tracker port.
//!
//! The transport's delivery guarantee ends at handoff: once the queue has
//! acked a delivery and called [`TaskManagerWorker::execute_task`], the
//! worker's status store owns the task's fate. The queue only ever feeds the
//! worker inputs, or forwards failures it detected before a task could even
//! be handed off (via [`TaskManagerWorker::fail`]).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryTaskWorker;

use crate::domain::{AdditionalInformation, TaskError, TaskId, TaskResult, TaskType, TaskWithId};

/// Executes tasks and records their terminal outcomes.
#[async_trait]
pub trait TaskManagerWorker: Send + Sync {
    /// Run one task to completion and record the outcome. The returned value
    /// mirrors what was recorded; callers may ignore it.
    async fn execute_task(&self, task: TaskWithId) -> Result<TaskResult, TaskError>;

    /// Record a terminal failure for a task that never produced a
    /// [`TaskResult`], including tasks that could not be deserialized and
    /// therefore never ran.
    async fn fail(&self, task_id: TaskId, reason: String);
}

/// Lifecycle of one task as seen by progress watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskExecutionStatus {
    /// Known to the tracker but not yet handed to an executor.
    Waiting,
    InProgress,
    Completed(TaskResult),
    Failed(String),
}

impl TaskExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskExecutionStatus::Completed(_) | TaskExecutionStatus::Failed(_)
        )
    }
}

/// Everything the tracker knows about one task.
#[derive(Debug, Clone)]
pub struct TaskExecutionDetails {
    pub task_id: TaskId,
    pub task_type: Option<TaskType>,
    pub status: TaskExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest progress snapshot; live while the task runs, frozen at its
    /// final value once the task reaches a terminal status.
    pub additional_information: Option<AdditionalInformation>,
}
