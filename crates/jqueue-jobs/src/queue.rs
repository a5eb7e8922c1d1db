//! Transport queue abstraction.

use crate::error::{JobError, JobResult};
use crate::job::Job;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// FIFO channel carrying serialized jobs from producers to workers.
///
/// Delivery is at-least-once without acknowledgement: a popped job is gone
/// from the transport. Ordering is enqueue order, independent of priority.
#[async_trait]
pub trait TransportQueue: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Appends a job to the tail of the channel.
    async fn enqueue(&self, job: &Job) -> JobResult<()>;

    /// Blocks until a job is available and removes it from the head.
    async fn dequeue(&self) -> JobResult<Job> {
        loop {
            if let Some(job) = self.dequeue_timeout(Duration::from_secs(1)).await? {
                return Ok(job);
            }
        }
    }

    /// Waits at most `wait` for a job. `Ok(None)` means the wait elapsed.
    ///
    /// An item that fails to decode is removed and reported as
    /// [`JobError::MalformedJob`].
    async fn dequeue_timeout(&self, wait: Duration) -> JobResult<Option<Job>>;

    /// Number of queued items.
    async fn len(&self) -> JobResult<u64>;

    /// Health check.
    async fn health_check(&self) -> JobResult<()>;
}

/// Process-local transport.
///
/// Items are kept in their serialized form so decoding behaves the same as
/// with a networked transport.
#[derive(Debug)]
pub struct InMemoryTransport {
    name: String,
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    outages: AtomicU32,
}

impl InMemoryTransport {
    /// Creates an empty transport.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            outages: AtomicU32::new(0),
        }
    }

    /// Pushes a raw item, bypassing serialization.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.items.lock().push_back(raw.into());
        self.notify.notify_one();
    }

    /// Makes the next `count` operations fail with `TransportUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.outages.store(count, Ordering::SeqCst);
    }

    /// Synchronous length, for tests and diagnostics.
    pub fn pending(&self) -> usize {
        self.items.lock().len()
    }

    fn check_outage(&self) -> JobResult<()> {
        let consumed = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if consumed {
            warn!(queue = %self.name, "Injected transport outage");
            return Err(JobError::TransportUnavailable(format!(
                "queue '{}' unavailable",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new("jobqueue")
    }
}

#[async_trait]
impl TransportQueue for InMemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &Job) -> JobResult<()> {
        self.check_outage()?;
        let raw = job.to_json()?;
        self.push_raw(raw);
        debug!(job_id = %job.display_id(), job_name = %job.name, queue = %self.name, "Job enqueued");
        Ok(())
    }

    async fn dequeue_timeout(&self, wait: Duration) -> JobResult<Option<Job>> {
        self.check_outage()?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();

            let raw = self.items.lock().pop_front();
            if let Some(raw) = raw {
                return Job::from_json(&raw).map(Some);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> JobResult<u64> {
        self.check_outage()?;
        Ok(self.items.lock().len() as u64)
    }

    async fn health_check(&self) -> JobResult<()> {
        self.check_outage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_independent_of_priority() {
        let queue = InMemoryTransport::default();
        queue.enqueue(&Job::new("email", "a").with_id(1).with_priority(1)).await.unwrap();
        queue.enqueue(&Job::new("email", "b").with_id(2).with_priority(9)).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().id.map(|id| id.get()), Some(1));
        assert_eq!(queue.dequeue().await.unwrap().id.map(|id| id.get()), Some(2));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_timeout_elapses() {
        let queue = InMemoryTransport::default();
        let popped = queue.dequeue_timeout(Duration::from_secs(5)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryTransport::default());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::task::yield_now().await;
        queue.enqueue(&Job::new("compress", json!({"path": "/tmp"}))).await.unwrap();

        let job = consumer.await.unwrap().unwrap();
        assert_eq!(job.name, "compress");
    }

    #[tokio::test]
    async fn test_malformed_item_is_dropped() {
        let queue = InMemoryTransport::default();
        queue.push_raw("{not json");
        queue.enqueue(&Job::new("email", "x")).await.unwrap();

        let err = queue.dequeue_timeout(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, JobError::MalformedJob(_)));

        let next = queue.dequeue_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(next.map(|job| job.name), Some("email".to_string()));
    }

    #[tokio::test]
    async fn test_injected_outage() {
        let queue = InMemoryTransport::default();
        queue.fail_next(2);

        assert!(queue.health_check().await.unwrap_err().is_transient());
        assert!(queue.enqueue(&Job::new("email", "x")).await.is_err());
        assert!(queue.health_check().await.is_ok());
        assert_eq!(queue.pending(), 0);
    }
}
