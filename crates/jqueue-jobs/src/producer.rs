//! Job submission.

use crate::error::{JobError, JobResult};
use crate::job::Job;
use crate::metrics::JobMetrics;
use crate::queue::TransportQueue;
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default number of enqueue attempts on transport failure.
pub const DEFAULT_ENQUEUE_ATTEMPTS: u32 = 3;

/// Submits jobs to the store and the transport.
#[derive(Clone)]
pub struct Producer {
    transport: Option<Arc<dyn TransportQueue>>,
    store: Option<Arc<dyn JobStore>>,
    enqueue_attempts: u32,
    enqueue_retry_delay: Duration,
}

impl Producer {
    /// Creates a producer that enqueues on the transport.
    pub fn new(transport: Arc<dyn TransportQueue>) -> Self {
        Self {
            transport: Some(transport),
            store: None,
            enqueue_attempts: DEFAULT_ENQUEUE_ATTEMPTS,
            enqueue_retry_delay: Duration::from_secs(2),
        }
    }

    /// Creates a producer that only persists, for polling-mode workers.
    pub fn polling(store: Arc<dyn JobStore>) -> Self {
        Self {
            transport: None,
            store: Some(store),
            enqueue_attempts: DEFAULT_ENQUEUE_ATTEMPTS,
            enqueue_retry_delay: Duration::from_secs(2),
        }
    }

    /// Persists every submitted job before enqueueing it.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the bounded retry applied to transport failures.
    pub fn with_enqueue_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.enqueue_attempts = attempts.max(1);
        self.enqueue_retry_delay = delay;
        self
    }

    /// Persists the job when a store is configured, then enqueues it.
    ///
    /// Returns the job as submitted, with its assigned ID.
    pub async fn submit(&self, job: Job) -> JobResult<Job> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            JobError::Configuration("producer has no transport; use submit_for_polling".to_string())
        })?;

        let job = match &self.store {
            Some(store) => store.create_job(job).await?,
            None => job,
        };

        let mut attempt = 1;
        loop {
            match transport.enqueue(&job).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < self.enqueue_attempts => {
                    warn!(
                        job_id = %job.display_id(),
                        attempt,
                        delay_ms = self.enqueue_retry_delay.as_millis() as u64,
                        error = %e,
                        "Enqueue failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.enqueue_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        JobMetrics::job_enqueued(transport.name(), &job.name);
        info!(
            job_id = %job.display_id(),
            job_name = %job.name,
            priority = job.priority,
            queue = %transport.name(),
            "Job submitted"
        );
        Ok(job)
    }

    /// Persists the job without enqueueing it; polling workers pick it up.
    pub async fn submit_for_polling(&self, job: Job) -> JobResult<Job> {
        let store = self.store.as_ref().ok_or_else(|| {
            JobError::Configuration("polling submission requires a job store".to_string())
        })?;

        let job = store.create_job(job).await?;
        info!(job_id = %job.display_id(), job_name = %job.name, "Job stored for polling");
        Ok(job)
    }
}
