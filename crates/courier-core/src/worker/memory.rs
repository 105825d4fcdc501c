//! In-memory worker executor and status tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;

use super::{TaskExecutionDetails, TaskExecutionStatus, TaskManagerWorker};
use crate::domain::{AdditionalInformation, Task, TaskError, TaskId, TaskResult, TaskType, TaskWithId};

struct Entry {
    task_type: Option<TaskType>,
    status: TaskExecutionStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// Final snapshot, captured when the task reaches a terminal status.
    snapshot: Option<AdditionalInformation>,
    /// Live handle while the task runs, so `details` reflects current
    /// progress without blocking execution.
    running: Option<Arc<dyn Task>>,
}

impl Entry {
    fn absent(status: TaskExecutionStatus) -> Self {
        Self {
            task_type: None,
            status,
            started_at: None,
            completed_at: None,
            snapshot: None,
            running: None,
        }
    }
}

/// Reference [`TaskManagerWorker`]: executes tasks on the tokio runtime and
/// is the single source of truth for their status.
///
/// Task panics are caught at the spawn boundary and recorded as failures;
/// they never propagate to the caller (the consume loop).
#[derive(Default)]
pub struct MemoryTaskWorker {
    entries: Mutex<HashMap<TaskId, Entry>>,
}

impl MemoryTaskWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, task_id: TaskId) -> Option<TaskExecutionStatus> {
        let entries = self.entries.lock().unwrap();
        entries.get(&task_id).map(|entry| entry.status.clone())
    }

    pub fn details(&self, task_id: TaskId) -> Option<TaskExecutionDetails> {
        let entries = self.entries.lock().unwrap();
        entries.get(&task_id).map(|entry| TaskExecutionDetails {
            task_id,
            task_type: entry.task_type.clone(),
            status: entry.status.clone(),
            started_at: entry.started_at,
            completed_at: entry.completed_at,
            additional_information: match &entry.running {
                Some(task) => task.details(),
                None => entry.snapshot.clone(),
            },
        })
    }

    pub fn statuses(&self) -> Vec<(TaskId, TaskExecutionStatus)> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|(id, entry)| (*id, entry.status.clone()))
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter(|entry| entry.status.is_terminal())
            .count()
    }

    fn record_started(&self, task_id: TaskId, task: &Arc<dyn Task>) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(task_id)
            .or_insert_with(|| Entry::absent(TaskExecutionStatus::Waiting));
        entry.task_type = Some(task.task_type());
        entry.status = TaskExecutionStatus::InProgress;
        entry.started_at = Some(Utc::now());
        entry.running = Some(Arc::clone(task));
    }

    fn record_terminal(&self, task_id: TaskId, status: TaskExecutionStatus) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(task_id)
            .or_insert_with(|| Entry::absent(TaskExecutionStatus::Waiting));
        if let Some(task) = entry.running.take() {
            entry.snapshot = task.details();
        }
        entry.status = status;
        entry.completed_at = Some(Utc::now());
    }
}

#[async_trait]
impl TaskManagerWorker for MemoryTaskWorker {
    async fn execute_task(&self, task: TaskWithId) -> Result<TaskResult, TaskError> {
        let task_id = task.id();
        self.record_started(task_id, task.task());

        // Run on a separate tokio task so a panicking task body surfaces as a
        // join error instead of unwinding through the executor.
        let body = Arc::clone(task.task());
        let outcome = tokio::spawn(async move { body.run().await }).await;

        match outcome {
            Ok(Ok(result)) => {
                self.record_terminal(task_id, TaskExecutionStatus::Completed(result));
                Ok(result)
            }
            Ok(Err(err)) => {
                error!(%task_id, %err, "task execution failed");
                self.record_terminal(task_id, TaskExecutionStatus::Failed(err.to_string()));
                Err(err)
            }
            Err(join_err) => {
                let reason = format!("task panicked: {join_err}");
                error!(%task_id, "{reason}");
                self.record_terminal(task_id, TaskExecutionStatus::Failed(reason.clone()));
                Err(TaskError::new(reason))
            }
        }
    }

    async fn fail(&self, task_id: TaskId, reason: String) {
        error!(%task_id, %reason, "task failed before execution");
        self.record_terminal(task_id, TaskExecutionStatus::Failed(reason));
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::domain::TaskType;

    struct GatedTask {
        gate: Arc<Notify>,
        progress: AtomicU64,
        outcome: Result<TaskResult, String>,
    }

    impl GatedTask {
        fn completing(gate: Arc<Notify>) -> Self {
            Self {
                gate,
                progress: AtomicU64::new(0),
                outcome: Ok(TaskResult::Completed),
            }
        }

        fn failing(gate: Arc<Notify>, reason: &str) -> Self {
            Self {
                gate,
                progress: AtomicU64::new(0),
                outcome: Err(reason.to_string()),
            }
        }
    }

    #[async_trait]
    impl Task for GatedTask {
        async fn run(&self) -> Result<TaskResult, TaskError> {
            self.progress.store(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.progress.store(2, Ordering::SeqCst);
            match &self.outcome {
                Ok(result) => Ok(*result),
                Err(reason) => Err(TaskError::new(reason.clone())),
            }
        }

        fn task_type(&self) -> TaskType {
            TaskType::new("gated")
        }

        fn details(&self) -> Option<AdditionalInformation> {
            Some(AdditionalInformation::new(serde_json::json!({
                "progress": self.progress.load(Ordering::SeqCst),
            })))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        async fn run(&self) -> Result<TaskResult, TaskError> {
            panic!("boom");
        }

        fn task_type(&self) -> TaskType {
            TaskType::new("panicking")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn completion_is_recorded() {
        let worker = Arc::new(MemoryTaskWorker::new());
        let gate = Arc::new(Notify::new());
        let task_id = TaskId::generate();
        let task = TaskWithId::new(task_id, Arc::new(GatedTask::completing(Arc::clone(&gate))));

        let execution = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.execute_task(task).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            worker.status(task_id),
            Some(TaskExecutionStatus::InProgress)
        );

        gate.notify_one();
        let result = execution.await.unwrap().unwrap();
        assert_eq!(result, TaskResult::Completed);
        assert_eq!(
            worker.status(task_id),
            Some(TaskExecutionStatus::Completed(TaskResult::Completed))
        );

        let details = worker.details(task_id).unwrap();
        assert_eq!(details.task_type, Some(TaskType::new("gated")));
        assert!(details.started_at.is_some());
        assert!(details.completed_at.is_some());
    }

    #[tokio::test]
    async fn details_reflect_live_progress_without_blocking_the_run() {
        let worker = Arc::new(MemoryTaskWorker::new());
        let gate = Arc::new(Notify::new());
        let task_id = TaskId::generate();
        let task = TaskWithId::new(task_id, Arc::new(GatedTask::completing(Arc::clone(&gate))));

        let execution = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.execute_task(task).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let details = worker.details(task_id).unwrap();
        let info = details.additional_information.unwrap();
        assert_eq!(info.properties()["progress"], 1);

        gate.notify_one();
        execution.await.unwrap().unwrap();

        // Terminal snapshot is frozen at the final progress value.
        let details = worker.details(task_id).unwrap();
        let info = details.additional_information.unwrap();
        assert_eq!(info.properties()["progress"], 2);
    }

    #[tokio::test]
    async fn execution_error_is_recorded_as_failure() {
        let worker = MemoryTaskWorker::new();
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let task_id = TaskId::generate();
        let task = TaskWithId::new(
            task_id,
            Arc::new(GatedTask::failing(Arc::clone(&gate), "storage exploded")),
        );

        let err = worker.execute_task(task).await.unwrap_err();
        assert_eq!(err.to_string(), "storage exploded");
        assert_eq!(
            worker.status(task_id),
            Some(TaskExecutionStatus::Failed("storage exploded".to_string()))
        );
    }

    #[tokio::test]
    async fn panicking_task_is_contained_and_recorded() {
        let worker = MemoryTaskWorker::new();
        let task_id = TaskId::generate();
        let task = TaskWithId::new(task_id, Arc::new(PanickingTask));

        let err = worker.execute_task(task).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(matches!(
            worker.status(task_id),
            Some(TaskExecutionStatus::Failed(_))
        ));
    }

    #[tokio::test]
    async fn fail_records_tasks_that_never_ran() {
        let worker = MemoryTaskWorker::new();
        let task_id = TaskId::generate();

        worker
            .fail(task_id, "unable to deserialize".to_string())
            .await;

        let details = worker.details(task_id).unwrap();
        assert_eq!(details.task_type, None);
        assert_eq!(
            details.status,
            TaskExecutionStatus::Failed("unable to deserialize".to_string())
        );
    }
}
