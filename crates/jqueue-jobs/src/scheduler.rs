//! Job selection policy.
//!
//! Among pending jobs, higher priority wins; within a priority the oldest job
//! wins; the ID breaks any remaining tie.

use crate::error::JobResult;
use crate::job::{Job, JobStatus};
use crate::store::JobStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Selection order: `priority` DESC, `created_at` ASC, `id` ASC.
pub fn selection_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Listing order: `priority` DESC, `created_at` DESC, `id` DESC.
pub fn listing_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Selects and claims pending jobs from a store.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
}

impl Scheduler {
    /// Creates a scheduler over the given store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Compares two jobs in selection order.
    pub fn order(a: &Job, b: &Job) -> Ordering {
        selection_order(a, b)
    }

    /// Picks the pending job that should run next.
    pub fn select_next(jobs: &[Job]) -> Option<&Job> {
        jobs.iter()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by(|a, b| selection_order(a, b))
    }

    /// Sorts jobs in selection order.
    pub fn sort(jobs: &mut [Job]) {
        jobs.sort_by(selection_order);
    }

    /// Peeks at the next pending job without claiming it.
    pub async fn next_job(&self) -> JobResult<Option<Job>> {
        self.store.get_next_job().await
    }

    /// Atomically selects and claims the next pending job.
    pub async fn claim_next(&self) -> JobResult<Option<Job>> {
        let claimed = self.store.claim_next_job().await?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.display_id(), job_name = %job.name, priority = job.priority, "Claimed job");
        }
        Ok(claimed)
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}
