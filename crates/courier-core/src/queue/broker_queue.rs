//! Broker-backed work queue.
//!
//! Delivery handling follows a fixed order that must never be rearranged:
//! secure execution capacity, receive, extract the task id header, **ack**,
//! deserialize, hand off. The ack comes before deserialization and execution
//! on purpose: broker-level redelivery would duplicate work for long-running
//! tasks. The cost is that a crash between ack and completion silently drops
//! the task; that limitation is accepted, not papered over. Capacity comes
//! before receive so a delivery is only taken (and acked) once it can
//! actually be handed off, and the wait at capacity stays responsive to
//! shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::{CancelError, StartError, SubmitError, WorkQueue, WorkQueueConfig};
use crate::broker::{
    Broker, Delivery, EXCHANGE_NAME, ExclusiveConsumer, ExclusiveConsumerChannel, MAX_CHANNELS,
    QUEUE_NAME, ROUTING_KEY, ReacquireBackoff, TASK_ID_HEADER, TopologySpec,
};
use crate::domain::{TaskId, TaskWithId};
use crate::serializer::TaskSerializer;
use crate::worker::TaskManagerWorker;

enum Lifecycle {
    Created,
    Started(JoinHandle<()>),
    Closed,
}

/// Work queue over a message broker: the one logical queue every node of the
/// cluster publishes to, consumed by whichever node currently holds
/// exclusivity.
pub struct BrokerWorkQueue {
    broker: Arc<dyn Broker>,
    serializer: TaskSerializer,
    worker: Arc<dyn TaskManagerWorker>,
    config: WorkQueueConfig,
    /// Channel pool shared between topology declaration and publishing;
    /// bounds concurrent publishes in flight.
    channels: Arc<Semaphore>,
    lifecycle: Mutex<Lifecycle>,
    shutdown_tx: watch::Sender<bool>,
}

impl BrokerWorkQueue {
    pub fn new(
        broker: Arc<dyn Broker>,
        serializer: TaskSerializer,
        worker: Arc<dyn TaskManagerWorker>,
        config: WorkQueueConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            serializer,
            worker,
            config,
            channels: Arc::new(Semaphore::new(MAX_CHANNELS)),
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown_tx,
        }
    }
}

#[async_trait]
impl WorkQueue for BrokerWorkQueue {
    async fn submit(&self, task: TaskWithId) -> Result<(), SubmitError> {
        {
            let lifecycle = self.lifecycle.lock().await;
            if !matches!(*lifecycle, Lifecycle::Started(_)) {
                return Err(SubmitError::NotStarted);
            }
        }

        let payload = self.serializer.serialize(task.task().as_ref())?;
        let headers = std::collections::HashMap::from([(
            TASK_ID_HEADER.to_string(),
            task.id().to_string(),
        )]);

        let _channel = self
            .channels
            .acquire()
            .await
            .expect("channel pool semaphore is never closed");
        match timeout(
            self.config.publish_timeout,
            self.broker
                .publish(EXCHANGE_NAME, ROUTING_KEY, headers, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SubmitError::Broker(err)),
            Err(_) => Err(SubmitError::Timeout(self.config.publish_timeout)),
        }
    }

    async fn cancel(&self, task_id: TaskId) -> Result<(), CancelError> {
        Err(CancelError::NotSupported(task_id))
    }

    async fn start(&self) -> Result<(), StartError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Started(_) => return Err(StartError::AlreadyStarted),
            Lifecycle::Closed => return Err(StartError::Closed),
            Lifecycle::Created => {}
        }

        {
            let _channel = self
                .channels
                .acquire()
                .await
                .expect("channel pool semaphore is never closed");
            self.broker
                .declare_topology(&TopologySpec::work_queue())
                .await?;
        }

        let consume_loop = ConsumeLoop {
            broker: Arc::clone(&self.broker),
            serializer: self.serializer.clone(),
            worker: Arc::clone(&self.worker),
            executions: Arc::new(Semaphore::new(self.config.max_concurrent_tasks)),
            backoff: self.config.reacquire_backoff.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        *lifecycle = Lifecycle::Started(tokio::spawn(consume_loop.run()));
        info!(queue = QUEUE_NAME, "work queue started");
        Ok(())
    }

    async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Closed);
        if let Lifecycle::Started(handle) = previous {
            if let Err(err) = handle.await {
                warn!(%err, "consume loop did not shut down cleanly");
            }
            info!(queue = QUEUE_NAME, "work queue closed");
        }
    }
}

struct ConsumeLoop {
    broker: Arc<dyn Broker>,
    serializer: TaskSerializer,
    worker: Arc<dyn TaskManagerWorker>,
    executions: Arc<Semaphore>,
    backoff: ReacquireBackoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConsumeLoop {
    async fn run(mut self) {
        let mut consumer = ExclusiveConsumer::new(
            Arc::clone(&self.broker),
            QUEUE_NAME,
            self.backoff.clone(),
            self.shutdown_rx.clone(),
        );

        // Outer loop: (re)acquire rights. Inner loop: drain deliveries until
        // the rights are lost or shutdown is requested.
        loop {
            let Some(mut channel) = consumer.acquire().await else {
                return;
            };
            info!(queue = QUEUE_NAME, "consuming the work queue");

            loop {
                if *self.shutdown_rx.borrow() {
                    channel.close().await;
                    return;
                }
                // Capacity first: when every permit is held by a running
                // task, the wait happens here, before the next delivery is
                // taken, and shutdown still gets through.
                let permit = tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() {
                            // Owner dropped without close; stop consuming.
                            channel.close().await;
                            return;
                        }
                        continue;
                    }
                    permit = Arc::clone(&self.executions).acquire_owned() => {
                        match permit {
                            Ok(permit) => permit,
                            Err(_) => {
                                channel.close().await;
                                return;
                            }
                        }
                    }
                };
                let delivery = tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() {
                            channel.close().await;
                            return;
                        }
                        continue;
                    }
                    delivery = channel.recv() => delivery,
                };
                match delivery {
                    Some(delivery) => {
                        self.handle_delivery(channel.as_mut(), delivery, permit).await
                    }
                    None => {
                        warn!(queue = QUEUE_NAME, "consumption rights lost; reacquiring");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_delivery(
        &self,
        channel: &mut dyn ExclusiveConsumerChannel,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
    ) {
        // A missing or unreadable id header means producer and consumer
        // disagree on the message schema. Fatal for this delivery, not for
        // the consumer: ack to discard and keep going.
        let Some(raw_id) = delivery.header(TASK_ID_HEADER) else {
            error!(
                header = TASK_ID_HEADER,
                "delivery has no task id header; discarding (schema mismatch?)"
            );
            let _ = channel.ack(delivery.delivery_tag).await;
            return;
        };
        let task_id = match raw_id.parse::<TaskId>() {
            Ok(id) => id,
            Err(err) => {
                error!(%err, "delivery has an unreadable task id header; discarding");
                let _ = channel.ack(delivery.delivery_tag).await;
                return;
            }
        };

        // Ack before deserialization and execution. If the ack does not
        // reach the broker the message is still the broker's to redeliver,
        // so executing now would duplicate work on the next holder.
        if let Err(err) = channel.ack(delivery.delivery_tag).await {
            warn!(%task_id, %err, "could not ack delivery; leaving it to redelivery");
            return;
        }

        let task = match self.serializer.deserialize(&delivery.payload) {
            Ok(task) => task,
            Err(err) => {
                error!(%task_id, %err, "unable to deserialize submitted task");
                self.worker.fail(task_id, err.to_string()).await;
                return;
            }
        };

        // The permit was secured before the delivery was taken; it rides
        // along with the execution and frees up when the task finishes.
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let _permit = permit;
            // Outcome is recorded by the worker; nothing to do with it here.
            let _ = worker.execute_task(TaskWithId::new(task_id, task)).await;
        });
    }
}
