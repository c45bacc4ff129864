//! Worker implementation for consuming queues.

use async_trait::async_trait;
use chrono::Utc;
use redq_redis::{Connector, TcpConnector};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::error::{QueueError, QueueResult};
use crate::queue::{Queue, QueueBinding};

/// Handles the `data` of dequeued envelopes.
///
/// Returning `Ok` marks the job done. An error, or running past the
/// worker's job timeout, sends the envelope back for a retry.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Process one payload.
    async fn consume(&self, data: Value) -> QueueResult<()>;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent polling tasks
    pub concurrency: usize,

    /// Poll interval when the queue is empty
    pub poll_interval: Duration,

    /// Timeout for job execution
    pub job_timeout: Duration,

    /// Deliveries before a failing job is dropped
    pub max_attempts: u32,

    /// Base retry delay, multiplied by the attempt count
    pub retry_after: Duration,

    /// How long `stop` waits for in-flight jobs before aborting them
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300), // 5 minutes
            max_attempts: 5,
            retry_after: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to one dequeued envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The consumer succeeded.
    Completed,
    /// The consumer failed; the envelope was rescheduled at `due_at`.
    Retried {
        /// Attempts recorded on the envelope.
        attempts: u32,
        /// Epoch second of the next delivery.
        due_at: i64,
    },
    /// The consumer failed and no attempts remain.
    Dropped {
        /// Attempts recorded on the envelope.
        attempts: u32,
    },
}

struct Shared<C: Connector> {
    queue: Queue<C>,
    binding: QueueBinding,
    consumer: Arc<dyn Consumer>,
    config: WorkerConfig,
}

impl<C: Connector> Shared<C> {
    async fn run_once(&self) -> QueueResult<Option<Outcome>> {
        if let Err(e) = self.queue.promote_now().await {
            warn!(queue = %self.binding.queue(), error = %e, "Failed to promote delayed jobs");
        }

        match self.queue.dequeue(self.binding.queue()).await? {
            Some(envelope) => self.process(envelope).await.map(Some),
            None => Ok(None),
        }
    }

    async fn process(&self, envelope: Envelope) -> QueueResult<Outcome> {
        debug!(
            queue = %envelope.queue,
            id = %envelope.id,
            attempts = envelope.attempts,
            "Processing job"
        );

        let result = tokio::time::timeout(
            self.config.job_timeout,
            self.consumer.consume(envelope.data.clone()),
        )
        .await;

        let reason = match result {
            Ok(Ok(())) => {
                debug!(queue = %envelope.queue, id = %envelope.id, "Job completed");
                return Ok(Outcome::Completed);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "Job timeout".to_string(),
        };

        self.fail(envelope, &reason).await
    }

    async fn fail(&self, mut envelope: Envelope, reason: &str) -> QueueResult<Outcome> {
        envelope.attempts = envelope.attempts.saturating_add(1);

        if envelope.attempts >= self.config.max_attempts {
            error!(
                queue = %envelope.queue,
                id = %envelope.id,
                attempts = envelope.attempts,
                error = %reason,
                "Job failed permanently, dropping"
            );
            return Ok(Outcome::Dropped {
                attempts: envelope.attempts,
            });
        }

        let backoff = i64::try_from(self.config.retry_after.as_secs())
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::from(envelope.attempts));
        let due_at = Utc::now().timestamp().saturating_add(backoff);

        error!(
            queue = %envelope.queue,
            id = %envelope.id,
            attempts = envelope.attempts,
            retry_in = backoff,
            error = %reason,
            "Job failed, scheduling retry"
        );

        if let Err(e) = self.queue.schedule(&envelope, due_at).await {
            self.restore(&envelope).await;
            return Err(e);
        }

        Ok(Outcome::Retried {
            attempts: envelope.attempts,
            due_at,
        })
    }

    /// Hand an envelope that could not be rescheduled back to its waiting list.
    async fn restore(&self, envelope: &Envelope) {
        match self.queue.requeue(envelope).await {
            Ok(()) => warn!(
                queue = %envelope.queue,
                id = %envelope.id,
                "Retry scheduling failed, job returned to the waiting list"
            ),
            Err(e) => error!(
                queue = %envelope.queue,
                id = %envelope.id,
                error = %e,
                payload = ?envelope.encode().ok(),
                "Retry scheduling failed and the job could not be restored"
            ),
        }
    }
}

/// Polls one queue and hands payloads to a [`Consumer`].
pub struct Worker<C: Connector = TcpConnector> {
    shared: Arc<Shared<C>>,
    running: Arc<RwLock<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl<C: Connector> Worker<C> {
    /// Create a worker with the default configuration.
    pub fn new(queue: Queue<C>, binding: QueueBinding, consumer: Arc<dyn Consumer>) -> Self {
        Self::with_config(queue, binding, consumer, WorkerConfig::default())
    }

    /// Create a worker with custom configuration.
    pub fn with_config(
        queue: Queue<C>,
        binding: QueueBinding,
        consumer: Arc<dyn Consumer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                binding,
                consumer,
                config,
            }),
            running: Arc::new(RwLock::new(false)),
            handles: Vec::new(),
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Promote due jobs, then process at most one envelope.
    ///
    /// Returns `None` when the queue was empty.
    pub async fn run_once(&self) -> QueueResult<Option<Outcome>> {
        self.shared.run_once().await
    }

    /// Start the polling tasks.
    pub async fn start(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        *running = true;
        drop(running);

        info!(
            queue = %self.shared.binding.queue(),
            connection = %self.shared.binding.connection(),
            concurrency = self.shared.config.concurrency,
            "Starting worker"
        );

        for i in 0..self.shared.config.concurrency.max(1) {
            let shared = self.shared.clone();
            let running = self.running.clone();

            let handle = tokio::spawn(async move {
                while *running.read().await {
                    match shared.run_once().await {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            tokio::time::sleep(shared.config.poll_interval).await;
                        }
                        Err(e) => {
                            warn!(worker = i, error = %e, "Error consuming queue");
                            tokio::time::sleep(shared.config.poll_interval).await;
                        }
                    }
                }

                debug!(worker = i, "Worker task stopped");
            });

            self.handles.push(handle);
        }

        Ok(())
    }

    /// Stop the worker.
    ///
    /// Each task finishes the envelope it is processing. Tasks still busy
    /// after `shutdown_timeout` are aborted.
    pub async fn stop(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(QueueError::WorkerNotRunning);
        }
        *running = false;
        drop(running);

        let shared = self.shared.clone();
        let deadline = tokio::time::Instant::now() + shared.config.shutdown_timeout;
        for mut handle in self.handles.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(
                    queue = %shared.binding.queue(),
                    "Worker task still busy at shutdown timeout, aborting"
                );
                handle.abort();
            }
        }

        info!(queue = %shared.binding.queue(), "Worker stopped");

        Ok(())
    }

    /// Check if the worker is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
