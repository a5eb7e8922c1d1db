//! Metrics for job queue monitoring, recorded through the `metrics` facade.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue.
pub mod names {
    /// Total jobs submitted to the transport.
    pub const JOBS_ENQUEUED_TOTAL: &str = "jqueue_jobs_enqueued_total";
    /// Total jobs taken by workers.
    pub const JOBS_DEQUEUED_TOTAL: &str = "jqueue_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "jqueue_jobs_completed_total";
    /// Total jobs that exhausted their retry budget.
    pub const JOBS_FAILED_TOTAL: &str = "jqueue_jobs_failed_total";
    /// Total retry attempts scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "jqueue_jobs_retried_total";
    /// Total jobs abandoned for lack of a handler.
    pub const JOBS_ABANDONED_TOTAL: &str = "jqueue_jobs_abandoned_total";
    /// Total items dropped because they failed to decode.
    pub const JOBS_MALFORMED_TOTAL: &str = "jqueue_jobs_malformed_total";
    /// Total transport failures seen by workers.
    pub const TRANSPORT_ERRORS_TOTAL: &str = "jqueue_jobs_transport_errors_total";

    /// Handler execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "jqueue_jobs_duration_seconds";
    /// Backoff delay before a retry, in seconds.
    pub const RETRY_DELAY_SECONDS: &str = "jqueue_jobs_retry_delay_seconds";

    /// Workers currently executing a job.
    pub const WORKERS_BUSY: &str = "jqueue_jobs_workers_busy";
    /// Worker pool concurrency.
    pub const WORKERS_CONCURRENCY: &str = "jqueue_jobs_workers_concurrency";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs taken for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that exhausted their retries"
    );
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(
        names::JOBS_ABANDONED_TOTAL,
        "Total number of jobs abandoned without a handler"
    );
    describe_counter!(
        names::JOBS_MALFORMED_TOTAL,
        "Total number of undecodable transport items dropped"
    );
    describe_counter!(
        names::TRANSPORT_ERRORS_TOTAL,
        "Total number of transport failures seen by workers"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Handler execution duration in seconds"
    );
    describe_histogram!(
        names::RETRY_DELAY_SECONDS,
        "Backoff delay before a retry in seconds"
    );

    describe_gauge!(names::WORKERS_BUSY, "Workers currently executing a job");
    describe_gauge!(names::WORKERS_CONCURRENCY, "Worker pool concurrency setting");
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job taken by a worker.
    pub fn job_dequeued(source: &str, job_name: &str) {
        counter!(
            names::JOBS_DEQUEUED_TOTAL,
            "source" => source.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(job_name: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "job_name" => job_name.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt.
    pub fn attempt_failed(job_name: &str, duration: Duration) {
        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job that exhausted its retries.
    pub fn job_failed(job_name: &str) {
        counter!(names::JOBS_FAILED_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    /// Record a scheduled retry.
    pub fn job_retried(job_name: &str, attempt: u32, delay: Duration) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_name" => job_name.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);

        histogram!(names::RETRY_DELAY_SECONDS, "job_name" => job_name.to_string())
            .record(delay.as_secs_f64());
    }

    /// Record a job abandoned.
    pub fn job_abandoned(job_name: &str) {
        counter!(names::JOBS_ABANDONED_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    /// Record a dropped undecodable item.
    pub fn job_malformed(queue: &str) {
        counter!(names::JOBS_MALFORMED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a transport failure.
    pub fn transport_error(queue: &str) {
        counter!(names::TRANSPORT_ERRORS_TOTAL, "queue" => queue.to_string()).increment(1);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update busy worker count.
    pub fn update_busy(pool_id: &str, busy: u64, concurrency: usize) {
        gauge!(names::WORKERS_BUSY, "pool_id" => pool_id.to_string()).set(busy as f64);
        gauge!(names::WORKERS_CONCURRENCY, "pool_id" => pool_id.to_string())
            .set(concurrency as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // No recorder installed; calls must be no-ops.
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_enqueued("jobqueue", "email");
        JobMetrics::job_dequeued("transport", "email");
        JobMetrics::job_completed("email", Duration::from_millis(20));
        JobMetrics::job_retried("email", 1, Duration::from_secs(2));
        WorkerMetrics::update_busy("pool", 1, 4);
    }
}
