//! Work queue carrying serialized `DispatchJob`s.
//!
//! Backed by a Redis list: producers `LPUSH`, the notifier `BLMOVE`s from the
//! other end into its processing list, so jobs come out in the order they
//! were pushed and survive a consumer crash.

use async_trait::async_trait;
use redis::{AsyncCommands, Direction};
use redis::aio::{ConnectionManager, MultiplexedConnection};

use herald_common::types::DispatchJob;

use crate::error::DispatchError;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish already-serialized jobs as one batch.
    async fn publish_batch(&self, messages: &[String]) -> Result<(), DispatchError>;

    /// Serialize and publish a single job.
    async fn publish(&self, job: &DispatchJob) -> Result<(), DispatchError> {
        let message = serde_json::to_string(job)?;
        self.publish_batch(std::slice::from_ref(&message)).await
    }
}

/// Producer side of the Redis list queue.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: ConnectionManager,
    queue: String,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, queue: impl Into<String>) -> Self {
        Self {
            redis,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish_batch(&self, messages: &[String]) -> Result<(), DispatchError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let depth: u64 = conn.lpush(&self.queue, messages).await?;

        tracing::debug!(
            queue = %self.queue,
            published = messages.len(),
            depth,
            "Published jobs to work queue"
        );
        Ok(())
    }
}

/// Name of the list holding jobs a consumer instance has taken but not yet
/// finished.
pub fn processing_list(queue: &str, instance: &str) -> String {
    format!("{queue}:processing:{instance}")
}

/// Consumer side of the Redis list queue.
///
/// Jobs are moved atomically into a per-instance processing list when taken
/// and removed from it once handled, so a consumer that dies mid-job leaves
/// the job behind for [`RedisJobConsumer::recover_in_flight`].
pub struct RedisJobConsumer {
    conn: MultiplexedConnection,
    queue: String,
    processing: String,
    poll_timeout_secs: f64,
}

impl RedisJobConsumer {
    /// `poll_timeout_secs` bounds each blocking read so the caller can check
    /// for shutdown between reads. `instance` must be unique per running
    /// consumer.
    pub fn new(
        conn: MultiplexedConnection,
        queue: impl Into<String>,
        instance: &str,
        poll_timeout_secs: f64,
    ) -> Self {
        let queue = queue.into();
        Self {
            processing: processing_list(&queue, instance),
            conn,
            queue,
            poll_timeout_secs,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Push jobs left in this instance's processing list back onto the queue,
    /// oldest first in line. Returns how many were recovered.
    pub async fn recover_in_flight(&mut self) -> Result<usize, DispatchError> {
        let mut recovered = 0;
        loop {
            let moved: Option<String> = self
                .conn
                .lmove(&self.processing, &self.queue, Direction::Left, Direction::Right)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(
                queue = %self.queue,
                processing = %self.processing,
                recovered,
                "Re-queued jobs left unfinished by a previous run"
            );
        }
        Ok(recovered)
    }

    /// Wait for the next raw job, or `None` when the poll timed out. The job
    /// stays in the processing list until [`RedisJobConsumer::ack`].
    pub async fn next_job(&mut self) -> Result<Option<String>, DispatchError> {
        let taken: Option<String> = self
            .conn
            .blmove(
                &self.queue,
                &self.processing,
                Direction::Right,
                Direction::Left,
                self.poll_timeout_secs,
            )
            .await?;

        Ok(taken)
    }

    /// Drop a handled job from the processing list.
    pub async fn ack(&mut self, raw: &str) -> Result<(), DispatchError> {
        let removed: i64 = self.conn.lrem(&self.processing, 1, raw).await?;
        if removed == 0 {
            tracing::warn!(processing = %self.processing, "Acknowledged job was not in the processing list");
        }
        Ok(())
    }
}
