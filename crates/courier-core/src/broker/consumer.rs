//! Cluster-wide exclusive consumer acquisition.
//!
//! Ownership of the queue is broker-mediated: whichever channel the broker
//! accepts holds the rights, and application logic never decides the winner.
//! "Nobody is currently consuming" is a transient, self-healing state, so the
//! acquisition loop retries indefinitely with capped backoff instead of
//! surfacing an error.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, ExclusiveConsumerChannel};

/// Backoff between acquisition attempts: exponential, capped, jittered.
///
/// Jitter keeps a cluster of nodes that all lost the same holder from
/// hammering the broker in lockstep.
#[derive(Debug, Clone)]
pub struct ReacquireBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReacquireBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl ReacquireBackoff {
    /// Delay before the given attempt (1-indexed), with up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.75..=1.0);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Acquires and re-acquires sole consumption rights on one queue.
pub struct ExclusiveConsumer {
    broker: Arc<dyn Broker>,
    queue: String,
    backoff: ReacquireBackoff,
    shutdown: watch::Receiver<bool>,
}

impl ExclusiveConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        backoff: ReacquireBackoff,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            backoff,
            shutdown,
        }
    }

    /// Acquire consumption rights, retrying until they are granted.
    ///
    /// Returns `None` only when shutdown is requested. Every broker error is
    /// treated as retryable here: refusal means another node currently holds
    /// the rights, unavailability means reconnection is in progress.
    pub async fn acquire(&mut self) -> Option<Box<dyn ExclusiveConsumerChannel>> {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            match self.broker.consume_exclusive(&self.queue).await {
                Ok(channel) => {
                    if attempt > 0 {
                        info!(queue = %self.queue, attempt, "acquired exclusive consumption rights");
                    }
                    return Some(channel);
                }
                Err(BrokerError::ExclusiveRefused(_)) => {
                    debug!(queue = %self.queue, "queue already held by another consumer; standing by");
                }
                Err(err) => {
                    warn!(queue = %self.queue, %err, "exclusive consume attempt failed; retrying");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay(attempt);
            tokio::select! {
                changed = self.shutdown.changed() => {
                    // A dropped sender means the owner is gone; stop retrying.
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = sleep(delay) => {}
            }
        }
    }
}
