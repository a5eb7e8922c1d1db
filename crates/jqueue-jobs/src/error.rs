//! Job error types.

use crate::job::{JobId, JobStatus};
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The exchange format could not be decoded.
    #[error("Malformed job: {0}")]
    MalformedJob(#[source] serde_json::Error),

    /// Transport connection or operation failure.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No handler is registered for the job type.
    #[error("No handler registered for job type: {0}")]
    HandlerNotFound(String),

    /// The handler returned an application error.
    #[error("Job execution failed: {0}")]
    HandlerExecutionFailed(String),

    /// Durable store operation failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Job record not found.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Illegal lifecycle transition.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Invalid job state for the requested operation.
    #[error("Invalid job state: {0}")]
    InvalidState(String),

    /// Encoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Returns true if the job retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::HandlerExecutionFailed(_))
    }

    /// Failure text recorded on the job: the handler's own message for
    /// execution failures, the full error otherwise.
    pub fn detail(&self) -> String {
        match self {
            JobError::HandlerExecutionFailed(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true if this is an infrastructure failure the caller should
    /// wait out rather than charge against a job.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::TransportUnavailable(_) | JobError::StoreUnavailable(_)
        )
    }
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::TransportUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        JobError::TransportUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for JobError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        JobError::StoreUnavailable(format!("Migration failed: {}", err))
    }
}
