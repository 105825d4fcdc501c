//! Demo: one node of the cluster, end to end.
//!
//! Wires the in-memory broker, the reference worker, and the work queue;
//! submits a reindexing task and a quota notice; polls their status until
//! both reach a terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use courier_core::domain::{TaskId, TaskWithId};
use courier_core::tasks::quota::{self, MailError, MailSender, QuotaNotificationTask};
use courier_core::tasks::reindexing::{self, MessageReindexingTask, ReindexError, ReindexPerformer};
use courier_core::worker::MemoryTaskWorker;
use courier_core::{BrokerWorkQueue, MemoryBroker, TaskRegistry, TaskSerializer, WorkQueue, WorkQueueConfig};

struct DemoIndexer;

#[async_trait]
impl ReindexPerformer for DemoIndexer {
    async fn reindex_message(&self, mailbox_id: &str, uid: u64) -> Result<(), ReindexError> {
        tracing::info!(mailbox_id, uid, "reindexing message");
        sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

struct StdoutMailer;

#[async_trait]
impl MailSender for StdoutMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError> {
        println!("--- mail to {recipient} ---\n{subject}\n\n{body}\n");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let indexer: Arc<dyn ReindexPerformer> = Arc::new(DemoIndexer);
    let mailer: Arc<dyn MailSender> = Arc::new(StdoutMailer);

    let mut registry = TaskRegistry::new();
    reindexing::register(&mut registry, Arc::clone(&indexer))?;
    quota::register(&mut registry, Arc::clone(&mailer))?;

    let broker = Arc::new(MemoryBroker::new());
    let worker = Arc::new(MemoryTaskWorker::new());

    let queue = BrokerWorkQueue::new(
        broker,
        TaskSerializer::new(Arc::new(registry)),
        Arc::clone(&worker) as _,
        WorkQueueConfig::new(4),
    );
    queue.start().await?;

    let reindex = TaskWithId::new(
        TaskId::generate(),
        Arc::new(MessageReindexingTask::new(Arc::clone(&indexer), "M1", 42)),
    );
    let notice = TaskWithId::new(
        TaskId::generate(),
        Arc::new(QuotaNotificationTask::new(
            Arc::clone(&mailer),
            "bob@example.org",
            92,
        )),
    );
    let ids = [reindex.id(), notice.id()];
    queue.submit(reindex).await?;
    queue.submit(notice).await?;

    for id in ids {
        loop {
            match worker.details(id) {
                Some(details) if details.status.is_terminal() => {
                    println!("task {id}: {:?}", details.status);
                    if let Some(info) = details.additional_information {
                        println!("  details at {}: {}", info.timestamp(), info.properties());
                    }
                    break;
                }
                _ => sleep(Duration::from_millis(50)).await,
            }
        }
    }

    queue.close().await;
    Ok(())
}
