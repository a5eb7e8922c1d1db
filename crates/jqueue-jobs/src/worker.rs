//! Worker pool for processing jobs.
//!
//! Every worker is a symmetric tokio task. A worker takes one job at a time
//! and keeps it through its whole retry lifetime, so a failing job occupies
//! its worker during backoff.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobStatus};
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::queue::TransportQueue;
use crate::registry::{Handler, HandlerRegistry};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use jqueue_config::{DispatchMode, WorkerConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,

    /// Where workers take jobs from.
    pub mode: DispatchMode,

    /// Longest single transport wait before re-checking for shutdown.
    pub dequeue_wait: Duration,

    /// Pause after a transport or store failure.
    pub transport_retry_delay: Duration,

    /// Store polling interval when nothing is pending.
    pub poll_interval: Duration,

    /// Backoff between attempts of a failing job.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            mode: DispatchMode::Transport,
            dequeue_wait: Duration::from_secs(1),
            transport_retry_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            mode: config.mode,
            dequeue_wait: config.dequeue_wait(),
            transport_retry_delay: config.transport_retry_delay(),
            poll_interval: config.poll_interval(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    running: AtomicBool,
    busy: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    retried: AtomicU64,
    skipped: AtomicU64,
    malformed: AtomicU64,
    transport_errors: AtomicU64,
    workers_lost: AtomicU64,
}

/// Worker pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Dispatch mode.
    pub mode: DispatchMode,

    /// Workers currently executing a job.
    pub busy: u64,

    /// Jobs completed.
    pub jobs_processed: u64,

    /// Jobs that exhausted their retries.
    pub jobs_failed: u64,

    /// Jobs abandoned without a handler.
    pub jobs_abandoned: u64,

    /// Retry attempts scheduled.
    pub jobs_retried: u64,

    /// Transported jobs whose store claim was rejected.
    pub jobs_skipped: u64,

    /// Undecodable transport items dropped.
    pub jobs_malformed: u64,

    /// Transport or store failures while fetching work.
    pub transport_errors: u64,

    /// Workers that ended abnormally, e.g. from a panicking handler.
    pub workers_lost: u64,
}

struct PoolInner {
    id: String,
    config: WorkerPoolConfig,
    registry: Arc<HandlerRegistry>,
    transport: Option<Arc<dyn TransportQueue>>,
    store: Option<Arc<dyn JobStore>>,
    counters: PoolCounters,
    /// Job currently held by each worker, keyed by worker ID.
    in_flight: Mutex<HashMap<String, String>>,
}

/// Worker pool for concurrent job processing.
pub struct WorkerPool {
    inner: PoolInner,
}

impl WorkerPool {
    /// Create a new worker pool dispatching to the given registry.
    pub fn new(registry: Arc<HandlerRegistry>, config: WorkerPoolConfig) -> Self {
        Self {
            inner: PoolInner {
                id: format!("worker-pool-{}", std::process::id()),
                config,
                registry,
                transport: None,
                store: None,
                counters: PoolCounters::default(),
                in_flight: Mutex::new(HashMap::new()),
            },
        }
    }

    /// Sets the pool ID used in logs and metrics.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.inner.id = id.into();
        self
    }

    /// Sets the transport to consume.
    pub fn with_transport(mut self, transport: Arc<dyn TransportQueue>) -> Self {
        self.inner.transport = Some(transport);
        self
    }

    /// Sets the durable store used to track job records.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.inner.store = Some(store);
        self
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        self.inner.stats()
    }

    /// Runs one job to completion, retrying in place.
    ///
    /// The job should already be claimed (`running`); a `pending` job is
    /// claimed locally first. Returns the job in its final state.
    pub async fn process_job_with_retry(&self, job: Job) -> JobResult<Job> {
        self.inner.process_job_with_retry(job, false).await
    }

    /// Spawns the workers.
    pub fn start(self) -> JobResult<WorkerPoolHandle> {
        let inner = Arc::new(self.inner);
        let config = &inner.config;

        if config.concurrency == 0 {
            return Err(JobError::Configuration(
                "worker pool concurrency must be at least 1".to_string(),
            ));
        }
        match config.mode {
            DispatchMode::Transport if inner.transport.is_none() => {
                return Err(JobError::Configuration(
                    "transport mode requires a transport queue".to_string(),
                ));
            }
            DispatchMode::Polling if inner.store.is_none() => {
                return Err(JobError::Configuration(
                    "polling mode requires a job store".to_string(),
                ));
            }
            _ => {}
        }

        inner.counters.running.store(true, Ordering::SeqCst);

        info!(
            pool_id = %inner.id,
            concurrency = config.concurrency,
            mode = %config.mode,
            handlers = ?inner.registry.names(),
            "Starting worker pool"
        );
        WorkerMetrics::update_busy(&inner.id, 0, config.concurrency);

        let token = CancellationToken::new();
        let tasks = (0..config.concurrency)
            .map(|n| {
                let worker_id = format!("{}-{}", inner.id, n);
                let inner = inner.clone();
                let token = token.clone();
                let span = tracing::info_span!("worker", worker_id = %worker_id);
                let task = tokio::spawn(
                    {
                        let worker_id = worker_id.clone();
                        async move {
                            inner.run_worker(&worker_id, token).await;
                        }
                    }
                    .instrument(span),
                );
                (worker_id, task)
            })
            .collect();

        Ok(WorkerPoolHandle {
            inner,
            token,
            tasks,
        })
    }
}

impl PoolInner {
    fn stats(&self) -> WorkerPoolStats {
        let c = &self.counters;
        WorkerPoolStats {
            id: self.id.clone(),
            running: c.running.load(Ordering::SeqCst),
            concurrency: self.config.concurrency,
            mode: self.config.mode,
            busy: c.busy.load(Ordering::Relaxed),
            jobs_processed: c.processed.load(Ordering::Relaxed),
            jobs_failed: c.failed.load(Ordering::Relaxed),
            jobs_abandoned: c.abandoned.load(Ordering::Relaxed),
            jobs_retried: c.retried.load(Ordering::Relaxed),
            jobs_skipped: c.skipped.load(Ordering::Relaxed),
            jobs_malformed: c.malformed.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
            workers_lost: c.workers_lost.load(Ordering::Relaxed),
        }
    }

    async fn run_worker(&self, worker_id: &str, token: CancellationToken) {
        debug!(worker_id, "Worker started");

        match self.config.mode {
            DispatchMode::Transport => {
                if let Some(transport) = &self.transport {
                    self.transport_loop(worker_id, transport.as_ref(), &token).await;
                }
            }
            DispatchMode::Polling => {
                if let Some(store) = &self.store {
                    self.polling_loop(worker_id, Scheduler::new(store.clone()), &token).await;
                }
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    async fn transport_loop(&self, worker_id: &str, transport: &dyn TransportQueue, token: &CancellationToken) {
        while !token.is_cancelled() {
            match transport.dequeue_timeout(self.config.dequeue_wait).await {
                Ok(Some(job)) => {
                    JobMetrics::job_dequeued("transport", &job.name);
                    self.begin(worker_id, &job);
                    self.handle_transported(job).await;
                    self.finish(worker_id);
                }
                Ok(None) => {}
                Err(JobError::MalformedJob(e)) => {
                    warn!(queue = %transport.name(), error = %e, "Dropping malformed job");
                    self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    JobMetrics::job_malformed(transport.name());
                }
                Err(e) => {
                    error!(queue = %transport.name(), error = %e, "Failed to dequeue job");
                    self.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                    JobMetrics::transport_error(transport.name());
                    self.pause(self.config.transport_retry_delay, token).await;
                }
            }
        }
    }

    async fn polling_loop(&self, worker_id: &str, scheduler: Scheduler, token: &CancellationToken) {
        while !token.is_cancelled() {
            match scheduler.claim_next().await {
                Ok(Some(job)) => {
                    JobMetrics::job_dequeued("store", &job.name);
                    self.begin(worker_id, &job);
                    if let Err(e) = self.process_job_with_retry(job, true).await {
                        error!(error = %e, "Failed to process claimed job");
                    }
                    self.finish(worker_id);
                }
                Ok(None) => self.pause(self.config.poll_interval, token).await,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    self.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                    self.pause(self.config.transport_retry_delay, token).await;
                }
            }
        }
    }

    fn begin(&self, worker_id: &str, job: &Job) {
        self.in_flight.lock().insert(worker_id.to_string(), job.display_id());
    }

    fn finish(&self, worker_id: &str) {
        self.in_flight.lock().remove(worker_id);
    }

    /// Sleeps unless shutdown is requested first.
    async fn pause(&self, delay: Duration, token: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {}
        }
    }

    /// Claims a transported job in the store, when both are present, then runs it.
    async fn handle_transported(&self, job: Job) {
        let (job, tracked) = match (&self.store, job.id) {
            (Some(store), Some(id)) => match store.mark_job_started(id).await {
                Ok(claimed) => (claimed, true),
                Err(e @ (JobError::InvalidState(_) | JobError::NotFound(_))) => {
                    warn!(job_id = %id, error = %e, "Claim rejected, skipping job");
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    // The item is already off the transport; run it untracked.
                    error!(job_id = %id, error = %e, "Store unavailable, running job untracked");
                    (job, false)
                }
            },
            _ => (job, false),
        };

        if let Err(e) = self.process_job_with_retry(job, tracked).await {
            warn!(error = %e, "Job not processed");
        }
    }

    async fn process_job_with_retry(&self, mut job: Job, tracked: bool) -> JobResult<Job> {
        if job.status == JobStatus::Pending {
            job.mark_running(Utc::now())?;
        } else if job.status != JobStatus::Running {
            return Err(JobError::InvalidTransition {
                from: job.status,
                to: JobStatus::Running,
            });
        }

        let job_id = job.display_id();
        let handler = match self.registry.resolve(&job.name) {
            Ok(handler) => handler,
            Err(e) => {
                error!(job_id = %job_id, job_name = %job.name, "No handler registered for job type");
                job.abandon(&e.to_string(), Utc::now())?;
                if tracked {
                    self.persist_update(&job).await;
                }
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_abandoned(&job.name);
                return Ok(job);
            }
        };

        let busy = self.counters.busy.fetch_add(1, Ordering::Relaxed) + 1;
        WorkerMetrics::update_busy(&self.id, busy, self.config.concurrency);

        let outcome = self.run_attempts(job, handler, tracked).await;

        let busy = self.counters.busy.fetch_sub(1, Ordering::Relaxed) - 1;
        WorkerMetrics::update_busy(&self.id, busy, self.config.concurrency);

        outcome
    }

    async fn run_attempts(&self, mut job: Job, handler: Handler, tracked: bool) -> JobResult<Job> {
        let job_id = job.display_id();
        let mut state = RetryState::new(job.retries, job.max_retries);
        let policy = self.config.retry_policy;

        loop {
            debug!(job_id = %job_id, job_name = %job.name, attempt = state.attempt() + 1, "Processing job");

            let started = Instant::now();
            let result = handler(job.payload.clone()).await;
            let elapsed = started.elapsed();

            let err = match result {
                Ok(()) => {
                    JobMetrics::job_completed(&job.name, elapsed);
                    return self.complete(job, tracked).await;
                }
                Err(failure) => JobError::from(failure),
            };

            JobMetrics::attempt_failed(&job.name, elapsed);

            let decision = if err.is_retryable() {
                state.on_failure(&policy)
            } else {
                RetryDecision::GiveUp
            };
            let detail = err.detail();

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    job.record_failure(&detail, Utc::now())?;
                    job.mark_running(Utc::now())?;
                    if tracked {
                        self.persist_update(&job).await;
                    }

                    warn!(
                        job_id = %job_id,
                        job_name = %job.name,
                        attempt = state.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Job failed, retrying"
                    );
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    JobMetrics::job_retried(&job.name, state.attempt(), delay);

                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return self.fail(job, &detail, tracked).await;
                }
            }
        }
    }

    async fn complete(&self, mut job: Job, tracked: bool) -> JobResult<Job> {
        job.mark_completed(None, Utc::now())?;

        if let (true, Some(store), Some(id)) = (tracked, &self.store, job.id) {
            match store.mark_job_completed(id, None).await {
                Ok(stored) => job = stored,
                Err(e) => error!(job_id = %id, error = %e, "Failed to mark job as complete"),
            }
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        info!(job_id = %job.display_id(), job_name = %job.name, retries = job.retries, "Job completed");
        Ok(job)
    }

    async fn fail(&self, mut job: Job, detail: &str, tracked: bool) -> JobResult<Job> {
        if job.is_exhausted() {
            job.record_failure(detail, Utc::now())?;
        } else {
            // Non-retryable failure with budget left.
            job.abandon(detail, Utc::now())?;
        }

        // Write the worker's terminal state as-is. Re-charging the attempt in
        // the store would go wrong if an intermediate update was lost.
        if tracked {
            if let Some(store) = &self.store {
                if let Err(e) = store.update_job(&job).await {
                    error!(job_id = %job.display_id(), error = %e, "Failed to mark job as failed");
                }
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        JobMetrics::job_failed(&job.name);
        error!(
            job_id = %job.display_id(),
            job_name = %job.name,
            retries = job.retries,
            error = %detail,
            "Job failed permanently"
        );
        Ok(job)
    }

    async fn persist_update(&self, job: &Job) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update_job(job).await {
                error!(job_id = %job.display_id(), error = %e, "Failed to persist job state");
            }
        }
    }
}

/// Handle to a running worker pool.
pub struct WorkerPoolHandle {
    inner: Arc<PoolInner>,
    token: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPoolHandle {
    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        self.inner.stats()
    }

    /// Token that stops the workers when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops taking new jobs and waits for every worker to finish its current
    /// job, including any pending retries.
    pub async fn shutdown(self) -> WorkerPoolStats {
        info!(pool_id = %self.inner.id, "Stopping worker pool...");
        self.token.cancel();

        for (worker_id, task) in self.tasks {
            if let Err(e) = task.await {
                let job_id = self.inner.in_flight.lock().remove(&worker_id);
                error!(
                    pool_id = %self.inner.id,
                    worker_id = %worker_id,
                    job_id = job_id.as_deref().unwrap_or("none"),
                    error = %e,
                    "Worker task ended abnormally"
                );
                self.inner.counters.workers_lost.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Every worker has stopped, including any that died mid-job.
        self.inner.counters.busy.store(0, Ordering::Relaxed);
        self.inner.counters.running.store(false, Ordering::SeqCst);
        let stats = self.inner.stats();

        info!(
            pool_id = %stats.id,
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            abandoned = stats.jobs_abandoned,
            "Worker pool stopped"
        );

        stats
    }
}
