//! Redis list transport.

use crate::error::JobResult;
use crate::job::Job;
use crate::queue::TransportQueue;
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

/// Shortest BLPOP timeout sent to Redis; zero would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

/// Transport backed by a single Redis list: `RPUSH` to enqueue, `BLPOP` to
/// dequeue.
pub struct RedisTransport {
    pool: Pool,
    key: String,
}

impl RedisTransport {
    /// Create a transport on the given list key.
    pub fn new(pool: Pool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn blocking_pop(&self, timeout_secs: f64) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;

        let popped: Option<(String, String)> = conn.blpop(&self.key, timeout_secs).await?;

        match popped {
            Some((_key, raw)) => {
                let job = Job::from_json(&raw)?;
                debug!(job_id = %job.display_id(), job_name = %job.name, queue = %self.key, "Job dequeued");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransportQueue for RedisTransport {
    fn name(&self) -> &str {
        &self.key
    }

    async fn enqueue(&self, job: &Job) -> JobResult<()> {
        let raw = job.to_json()?;
        let mut conn = self.conn().await?;

        let depth: u64 = conn.rpush(&self.key, raw).await?;

        debug!(
            job_id = %job.display_id(),
            job_name = %job.name,
            queue = %self.key,
            depth,
            "Job enqueued"
        );

        Ok(())
    }

    async fn dequeue(&self) -> JobResult<Job> {
        loop {
            // A zero timeout blocks until an item arrives.
            if let Some(job) = self.blocking_pop(0.0).await? {
                return Ok(job);
            }
        }
    }

    async fn dequeue_timeout(&self, wait: Duration) -> JobResult<Option<Job>> {
        self.blocking_pop(wait.as_secs_f64().max(MIN_BLOCK_SECS)).await
    }

    async fn len(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(&self.key).await?)
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
