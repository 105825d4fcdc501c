//! Single-message mailbox reindexing.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{AdditionalInformation, Task, TaskError, TaskResult, TaskType};
use crate::serializer::{RegistryError, TaskRegistry};

pub const MESSAGE_REINDEXING: &str = "reindex";

/// Port to the mailbox index. The real implementation lives with the mailbox
/// storage; tests and the demo plug in stubs.
#[async_trait]
pub trait ReindexPerformer: Send + Sync {
    async fn reindex_message(&self, mailbox_id: &str, uid: u64) -> Result<(), ReindexError>;
}

#[derive(Debug, thiserror::Error)]
#[error("mailbox storage error: {0}")]
pub struct ReindexError(pub String);

/// Reindex one message of one mailbox.
///
/// A storage error during the run is a recoverable sub-failure: the task
/// still terminates with `Partial`, it does not travel the `fail` channel.
pub struct MessageReindexingTask {
    performer: Arc<dyn ReindexPerformer>,
    mailbox_id: String,
    uid: u64,
    additional_information: AdditionalInformation,
}

impl MessageReindexingTask {
    pub fn new(performer: Arc<dyn ReindexPerformer>, mailbox_id: impl Into<String>, uid: u64) -> Self {
        let mailbox_id = mailbox_id.into();
        let additional_information = AdditionalInformation::new(serde_json::json!({
            "mailboxId": mailbox_id,
            "uid": uid,
        }));
        Self {
            performer,
            mailbox_id,
            uid,
            additional_information,
        }
    }

    pub fn mailbox_id(&self) -> &str {
        &self.mailbox_id
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }
}

#[async_trait]
impl Task for MessageReindexingTask {
    async fn run(&self) -> Result<TaskResult, TaskError> {
        match self
            .performer
            .reindex_message(&self.mailbox_id, self.uid)
            .await
        {
            Ok(()) => Ok(TaskResult::Completed),
            Err(err) => {
                warn!(
                    mailbox_id = %self.mailbox_id,
                    uid = self.uid,
                    %err,
                    "error while reindexing message"
                );
                Ok(TaskResult::Partial)
            }
        }
    }

    fn task_type(&self) -> TaskType {
        TaskType::new(MESSAGE_REINDEXING)
    }

    fn details(&self) -> Option<AdditionalInformation> {
        Some(self.additional_information.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct MessageReindexingTaskDto {
    #[serde(rename = "mailboxId")]
    mailbox_id: String,
    uid: u64,
}

/// Register the reindexing codec; `performer` is re-injected into every
/// deserialized task.
pub fn register(
    registry: &mut TaskRegistry,
    performer: Arc<dyn ReindexPerformer>,
) -> Result<(), RegistryError> {
    registry.register::<MessageReindexingTask, MessageReindexingTaskDto>(
        TaskType::new(MESSAGE_REINDEXING),
        |task| MessageReindexingTaskDto {
            mailbox_id: task.mailbox_id.clone(),
            uid: task.uid,
        },
        move |dto| MessageReindexingTask::new(Arc::clone(&performer), dto.mailbox_id, dto.uid),
    )
}
