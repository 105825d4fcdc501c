//! Quota-threshold notification mail.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AdditionalInformation, Task, TaskError, TaskResult, TaskType};
use crate::serializer::{RegistryError, TaskRegistry};

pub const QUOTA_NOTIFICATION: &str = "quota-notification";

const SUBJECT: &str = "Warning: Your email usage just exceeded a configured threshold";

/// Port to the mail transport.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

#[derive(Debug, thiserror::Error)]
#[error("mail transport error: {0}")]
pub struct MailError(pub String);

/// Warn a user that their mailbox usage crossed a quota threshold.
///
/// Unlike reindexing there is no partial outcome here: either the mail went
/// out (`Completed`) or the transport failed and the task fails outright.
pub struct QuotaNotificationTask {
    sender: Arc<dyn MailSender>,
    user: String,
    used_percent: u8,
}

impl QuotaNotificationTask {
    pub fn new(sender: Arc<dyn MailSender>, user: impl Into<String>, used_percent: u8) -> Self {
        Self {
            sender,
            user: user.into(),
            used_percent,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn used_percent(&self) -> u8 {
        self.used_percent
    }
}

#[async_trait]
impl Task for QuotaNotificationTask {
    async fn run(&self) -> Result<TaskResult, TaskError> {
        let body = format!(
            "Your mailbox is at {}% of its allowed quota. \
             Consider deleting old messages to stay below the limit.",
            self.used_percent
        );
        self.sender
            .send(&self.user, SUBJECT, &body)
            .await
            .map_err(|err| TaskError::with_source("unable to send quota notice", err))?;
        Ok(TaskResult::Completed)
    }

    fn task_type(&self) -> TaskType {
        TaskType::new(QUOTA_NOTIFICATION)
    }

    fn details(&self) -> Option<AdditionalInformation> {
        Some(AdditionalInformation::new(serde_json::json!({
            "user": self.user,
            "usedPercent": self.used_percent,
        })))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct QuotaNotificationTaskDto {
    user: String,
    #[serde(rename = "usedPercent")]
    used_percent: u8,
}

pub fn register(
    registry: &mut TaskRegistry,
    sender: Arc<dyn MailSender>,
) -> Result<(), RegistryError> {
    registry.register::<QuotaNotificationTask, QuotaNotificationTaskDto>(
        TaskType::new(QUOTA_NOTIFICATION),
        |task| QuotaNotificationTaskDto {
            user: task.user.clone(),
            used_percent: task.used_percent,
        },
        move |dto| QuotaNotificationTask::new(Arc::clone(&sender), dto.user, dto.used_percent),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        async fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), MailError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct DownTransport;

    #[async_trait]
    impl MailSender for DownTransport {
        async fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
            Err(MailError("relay unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn sends_the_warning_and_completes() {
        let sender = Arc::new(RecordingSender::default());
        let task = QuotaNotificationTask::new(Arc::clone(&sender) as Arc<dyn MailSender>, "bob@example.org", 92);

        assert_eq!(task.run().await.unwrap(), TaskResult::Completed);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bob@example.org");
        assert_eq!(sent[0].1, SUBJECT);
    }

    #[tokio::test]
    async fn transport_failure_travels_the_error_channel() {
        let task = QuotaNotificationTask::new(Arc::new(DownTransport), "bob@example.org", 92);
        let err = task.run().await.unwrap_err();
        assert!(err.to_string().contains("quota notice"));
    }

    #[tokio::test]
    async fn roundtrips_through_the_registry() {
        let mut registry = TaskRegistry::new();
        register(&mut registry, Arc::new(RecordingSender::default())).unwrap();
        let serializer = crate::serializer::TaskSerializer::new(Arc::new(registry));

        let task =
            QuotaNotificationTask::new(Arc::new(RecordingSender::default()), "bob@example.org", 92);
        let back = serializer
            .deserialize(&serializer.serialize(&task).unwrap())
            .unwrap();
        let back = back
            .as_any()
            .downcast_ref::<QuotaNotificationTask>()
            .unwrap();
        assert_eq!(back.user(), "bob@example.org");
        assert_eq!(back.used_percent(), 92);
    }
}
