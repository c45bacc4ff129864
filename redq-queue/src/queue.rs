//! Queue protocol over a Redis list and a shared delayed sorted set.

use chrono::Utc;
use redq_redis::{ConnectionRegistry, Connector, ResilientClient, TcpConnector};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::envelope::{Envelope, JobData};
use crate::error::{QueueError, QueueResult};

/// Shared sorted set holding delayed envelopes for every queue.
pub const DELAYED_KEY: &str = "delayed";

/// Queue consumed by [`JobsConsumer`](crate::JobsConsumer) unless configured otherwise.
pub const DEFAULT_JOBS_QUEUE: &str = "jobs_queue_async_consumer";

/// Connection used unless configured otherwise.
pub const DEFAULT_CONNECTION: &str = "default";

/// List key of a queue's waiting list.
pub fn waiting_key(queue: &str) -> String {
    format!("waiting:{}", queue)
}

/// Which queue, on which named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    queue: String,
    connection: String,
}

impl QueueBinding {
    /// Create a binding. Both names must be non-empty.
    pub fn new(queue: impl Into<String>, connection: impl Into<String>) -> QueueResult<Self> {
        let queue = queue.into();
        let connection = connection.into();

        if queue.trim().is_empty() {
            return Err(QueueError::Config("queue name is empty".to_string()));
        }
        if connection.trim().is_empty() {
            return Err(QueueError::Config(format!(
                "connection name is empty for queue {}",
                queue
            )));
        }

        Ok(Self { queue, connection })
    }

    /// Queue name.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Connection name.
    pub fn connection(&self) -> &str {
        &self.connection
    }
}

impl Default for QueueBinding {
    fn default() -> Self {
        Self {
            queue: DEFAULT_JOBS_QUEUE.to_string(),
            connection: DEFAULT_CONNECTION.to_string(),
        }
    }
}

/// Job queue backed by Redis.
///
/// Immediate envelopes are appended to `waiting:{queue}` and popped from
/// the head, so each queue is FIFO. Delayed envelopes go to the shared
/// `delayed` sorted set scored by their due time until
/// [`promote_due`](Queue::promote_due) moves them.
pub struct Queue<C: Connector = TcpConnector> {
    client: Arc<ResilientClient<C>>,
}

impl<C: Connector> Clone for Queue<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<C: Connector> Queue<C> {
    /// Create a queue over an existing client.
    pub fn new(client: Arc<ResilientClient<C>>) -> Self {
        Self { client }
    }

    /// Create a queue on the binding's connection.
    pub async fn from_registry(
        registry: &ConnectionRegistry<C>,
        binding: &QueueBinding,
    ) -> QueueResult<Self> {
        let client = registry.connection(binding.connection()).await?;
        Ok(Self::new(client))
    }

    /// Underlying client.
    pub fn client(&self) -> &Arc<ResilientClient<C>> {
        &self.client
    }

    /// Enqueue `data` on `queue`, delayed by `delay` seconds.
    ///
    /// Returns `true` when Redis acknowledged the write.
    pub async fn enqueue(&self, queue: &str, data: JobData, delay: i64) -> QueueResult<bool> {
        if queue.trim().is_empty() {
            return Err(QueueError::Config("queue name is empty".to_string()));
        }

        let envelope = Envelope::new(queue, data, delay);
        self.push(&envelope).await
    }

    /// Write a prepared envelope: immediate ones to the waiting list,
    /// delayed ones to the delayed set at `time + delay`.
    pub async fn push(&self, envelope: &Envelope) -> QueueResult<bool> {
        let payload = envelope.encode()?;

        if envelope.is_immediate() {
            debug!(queue = %envelope.queue, id = %envelope.id, "Enqueueing job");
            let len = self
                .client
                .rpush(&waiting_key(&envelope.queue), &[payload])
                .await?;
            Ok(len > 0)
        } else {
            debug!(
                queue = %envelope.queue,
                id = %envelope.id,
                due = envelope.due_at(),
                "Enqueueing delayed job"
            );
            self.schedule_raw(&payload, envelope.due_at()).await
        }
    }

    /// Append an envelope to the tail of its waiting list, whatever its delay.
    pub async fn requeue(&self, envelope: &Envelope) -> QueueResult<()> {
        let payload = envelope.encode()?;
        self.client
            .rpush(&waiting_key(&envelope.queue), &[payload])
            .await?;
        Ok(())
    }

    /// Put an envelope into the delayed set with an explicit due time.
    pub async fn schedule(&self, envelope: &Envelope, due_at: i64) -> QueueResult<bool> {
        let payload = envelope.encode()?;
        self.schedule_raw(&payload, due_at).await
    }

    async fn schedule_raw(&self, payload: &str, due_at: i64) -> QueueResult<bool> {
        let added = self.client.zadd(DELAYED_KEY, due_at, payload).await?;
        Ok(added > 0)
    }

    /// Pop the next envelope from `queue`.
    ///
    /// An empty list yields `None`. Payloads that do not decode are
    /// discarded with a warning and the next entry is tried.
    pub async fn dequeue(&self, queue: &str) -> QueueResult<Option<Envelope>> {
        let key = waiting_key(queue);

        while let Some(raw) = self.client.lpop(&key).await? {
            match Envelope::decode(&raw) {
                Ok(envelope) => {
                    trace!(queue = %queue, id = %envelope.id, "Dequeued job");
                    return Ok(Some(envelope));
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Dropping malformed queue entry");
                }
            }
        }

        Ok(None)
    }

    /// Move every delayed envelope due at or before `now` to its waiting list.
    ///
    /// Members are pushed unmodified and only by the caller whose `ZREM`
    /// removed them, so concurrent movers do not duplicate work. Returns
    /// the number of envelopes moved.
    pub async fn promote_due(&self, now: i64) -> QueueResult<usize> {
        let due = self
            .client
            .zrangebyscore(DELAYED_KEY, "-inf", &now.to_string())
            .await?;

        let mut moved = 0;
        for member in due {
            if self.client.zrem(DELAYED_KEY, &member).await? == 0 {
                continue;
            }

            match Envelope::decode(&member) {
                Ok(envelope) => {
                    let pushed = self
                        .client
                        .rpush(&waiting_key(&envelope.queue), &[member.as_str()])
                        .await;
                    if let Err(e) = pushed {
                        self.restore_delayed(&envelope, &member, now).await;
                        return Err(e.into());
                    }
                    moved += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed delayed entry");
                }
            }
        }

        if moved > 0 {
            debug!(moved, "Promoted delayed jobs");
        }

        Ok(moved)
    }

    /// Put a member taken out of `delayed` back, due at `now`.
    async fn restore_delayed(&self, envelope: &Envelope, member: &str, now: i64) {
        match self.client.zadd(DELAYED_KEY, now, member).await {
            Ok(_) => warn!(
                queue = %envelope.queue,
                id = %envelope.id,
                "Promotion failed, job returned to the delayed set"
            ),
            Err(e) => error!(
                queue = %envelope.queue,
                id = %envelope.id,
                error = %e,
                payload = %member,
                "Promotion failed and the job could not be restored"
            ),
        }
    }

    /// [`promote_due`](Queue::promote_due) with the current time.
    pub async fn promote_now(&self) -> QueueResult<usize> {
        self.promote_due(Utc::now().timestamp()).await
    }

    /// Number of envelopes waiting on `queue`.
    pub async fn waiting_len(&self, queue: &str) -> QueueResult<usize> {
        Ok(self.client.llen(&waiting_key(queue)).await?.max(0) as usize)
    }

    /// Number of delayed envelopes across all queues.
    pub async fn delayed_len(&self) -> QueueResult<usize> {
        Ok(self.client.zcard(DELAYED_KEY).await?.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redq_redis::{Command, ConnectionConfig, MemoryConnector};
    use serde_json::json;

    async fn queue() -> Queue<MemoryConnector> {
        let client = ResilientClient::connect("default", ConnectionConfig::default(), MemoryConnector::new())
            .await
            .unwrap();
        Queue::new(Arc::new(client))
    }

    #[test]
    fn test_binding_validation() {
        assert!(QueueBinding::new("emails", "default").is_ok());
        assert!(matches!(QueueBinding::new("", "default"), Err(QueueError::Config(_))));
        assert!(matches!(QueueBinding::new("emails", " "), Err(QueueError::Config(_))));

        let binding = QueueBinding::default();
        assert_eq!(binding.queue(), DEFAULT_JOBS_QUEUE);
        assert_eq!(binding.connection(), DEFAULT_CONNECTION);
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_roundtrip() {
        let queue = queue().await;
        let payload = json!({"to": "user@example.com", "tags": [1, 2]});

        assert!(queue.enqueue("emails", payload.clone(), 0).await.unwrap());

        let envelope = queue.dequeue("emails").await.unwrap().unwrap();
        assert_eq!(envelope.data, payload);
        assert_eq!(envelope.queue, "emails");
        assert_eq!(envelope.attempts, 0);
        assert!(queue.dequeue("emails").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue().await;
        queue.enqueue("q", json!("first"), 0).await.unwrap();
        queue.enqueue("q", json!("second"), 0).await.unwrap();

        assert_eq!(queue.dequeue("q").await.unwrap().unwrap().data, json!("first"));
        assert_eq!(queue.dequeue("q").await.unwrap().unwrap().data, json!("second"));
    }

    #[tokio::test]
    async fn test_delayed_scored_by_due_time() {
        let queue = queue().await;
        let envelope = Envelope::at(1_000, "reports", json!(1), 60);
        let raw = envelope.encode().unwrap();

        assert!(queue.push(&envelope).await.unwrap());

        assert_eq!(queue.waiting_len("reports").await.unwrap(), 0);
        assert_eq!(queue.delayed_len().await.unwrap(), 1);
        assert_eq!(
            queue.client().zscore(DELAYED_KEY, &raw).await.unwrap(),
            Some(1_060)
        );
    }

    #[tokio::test]
    async fn test_huge_delay_stays_delayed() {
        let queue = queue().await;
        assert!(queue.enqueue("q", json!(1), i64::MAX).await.unwrap());

        assert_eq!(queue.promote_now().await.unwrap(), 0);
        assert_eq!(queue.waiting_len("q").await.unwrap(), 0);
        assert_eq!(queue.delayed_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_promotion_keeps_job_delayed() {
        let queue = queue().await;
        let envelope = Envelope::at(1_000, "q", json!("keep"), 10);
        queue.push(&envelope).await.unwrap();

        queue
            .client()
            .execute(Command::new("SET").key(waiting_key("q")).arg("not a list"))
            .await
            .unwrap();

        assert!(queue.promote_due(2_000).await.is_err());
        assert_eq!(queue.delayed_len().await.unwrap(), 1);

        queue.client().del(&waiting_key("q")).await.unwrap();
        assert_eq!(queue.promote_due(2_000).await.unwrap(), 1);
        assert_eq!(queue.dequeue("q").await.unwrap().unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_negative_delay_is_immediate() {
        let queue = queue().await;
        queue.enqueue("q", json!(null), -10).await.unwrap();
        assert_eq!(queue.waiting_len("q").await.unwrap(), 1);
        assert_eq!(queue.delayed_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_promote_due_moves_unmodified() {
        let queue = queue().await;
        let early = Envelope::at(1_000, "a", json!("early"), 10);
        let late = Envelope::at(1_000, "b", json!("late"), 500);
        queue.push(&early).await.unwrap();
        queue.push(&late).await.unwrap();

        assert_eq!(queue.promote_due(1_009).await.unwrap(), 0);
        assert_eq!(queue.promote_due(1_010).await.unwrap(), 1);

        let promoted = queue.dequeue("a").await.unwrap().unwrap();
        assert_eq!(promoted, early);
        assert_eq!(queue.waiting_len("b").await.unwrap(), 0);
        assert_eq!(queue.delayed_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let queue = queue().await;
        queue
            .client()
            .rpush(&waiting_key("q"), &["garbage"])
            .await
            .unwrap();
        queue.enqueue("q", json!(7), 0).await.unwrap();
        queue.client().zadd(DELAYED_KEY, 1, "also garbage").await.unwrap();

        assert_eq!(queue.dequeue("q").await.unwrap().unwrap().data, json!(7));
        assert_eq!(queue.promote_due(10).await.unwrap(), 0);
        assert_eq!(queue.delayed_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_name_rejected() {
        let queue = queue().await;
        assert!(matches!(
            queue.enqueue("", json!(1), 0).await,
            Err(QueueError::Config(_))
        ));
    }
}
