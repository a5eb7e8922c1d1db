//! Durable job store.
//!
//! The store is the source of truth for job records when configured. Workers
//! claim records through it so a job is never run by two workers at once.

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

use crate::error::JobResult;
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use serde_json::Value;

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Exact-match filter for listing and counting jobs. Unset fields match
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Job ID.
    pub id: Option<JobId>,
    /// Lifecycle status.
    pub status: Option<JobStatus>,
    /// Priority.
    pub priority: Option<i32>,
    /// Owner tag.
    pub owner: Option<String>,
    /// Job type name.
    pub name: Option<String>,
}

impl JobFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by ID.
    pub fn id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    /// Filters by status.
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Filters by owner.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Filters by job type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns true if the job satisfies every set field.
    pub fn matches(&self, job: &Job) -> bool {
        self.id.map_or(true, |id| job.id == Some(id))
            && self.status.map_or(true, |status| job.status == status)
            && self.priority.map_or(true, |priority| job.priority == priority)
            && self
                .owner
                .as_deref()
                .map_or(true, |owner| job.owner.as_deref() == Some(owner))
            && self.name.as_deref().map_or(true, |name| job.name == name)
    }
}

/// Persistence contract for job records.
///
/// Soft-deleted records are invisible to every operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job and returns it with its assigned ID.
    async fn create_job(&self, job: Job) -> JobResult<Job>;

    /// Fetches one job.
    async fn get_job(&self, id: JobId) -> JobResult<Job>;

    /// Overwrites the mutable fields of an existing record.
    async fn update_job(&self, job: &Job) -> JobResult<()>;

    /// Peeks at the pending job that would be selected next.
    async fn get_next_job(&self) -> JobResult<Option<Job>>;

    /// Lists jobs, highest priority first and newest first within a priority.
    async fn list_jobs(&self, filter: &JobFilter, limit: u32, offset: u32) -> JobResult<Vec<Job>>;

    /// Counts jobs matching the filter.
    async fn count_jobs(&self, filter: &JobFilter) -> JobResult<u64>;

    /// Claims a specific pending job (`pending -> running`).
    ///
    /// Fails with `InvalidState` if the record is no longer pending.
    async fn mark_job_started(&self, id: JobId) -> JobResult<Job>;

    /// `running -> completed`.
    async fn mark_job_completed(&self, id: JobId, result: Option<Value>) -> JobResult<Job>;

    /// Charges one failed attempt atomically: back to `pending` while budget
    /// remains, otherwise terminally `failed`.
    async fn mark_job_failed(&self, id: JobId, result: Value) -> JobResult<Job>;

    /// Atomically selects and claims the next pending job.
    async fn claim_next_job(&self) -> JobResult<Option<Job>>;

    /// `pending -> cancelled`.
    async fn cancel_job(&self, id: JobId) -> JobResult<Job>;

    /// Soft-deletes a job.
    async fn delete_job(&self, id: JobId) -> JobResult<()>;

    /// Health check.
    async fn health_check(&self) -> JobResult<()>;
}
