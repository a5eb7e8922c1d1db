//! In-process job store.

use super::{JobFilter, JobStore};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus};
use crate::scheduler::{listing_order, selection_order};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

struct StoredJob {
    job: Job,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    jobs: HashMap<JobId, StoredJob>,
}

impl State {
    fn live(&self) -> impl Iterator<Item = &Job> {
        self.jobs
            .values()
            .filter(|stored| stored.deleted_at.is_none())
            .map(|stored| &stored.job)
    }

    fn get_mut(&mut self, id: JobId) -> JobResult<&mut Job> {
        self.jobs
            .get_mut(&id)
            .filter(|stored| stored.deleted_at.is_none())
            .map(|stored| &mut stored.job)
            .ok_or(JobError::NotFound(id))
    }

    fn next_pending_id(&self) -> Option<JobId> {
        self.live()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by(|a, b| selection_order(a, b))
            .and_then(|job| job.id)
    }
}

/// Job store kept in process memory.
///
/// Every operation runs under one mutex, which makes claims atomic across
/// workers sharing the store.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.lock().live().count()
    }

    /// Returns true if no live records exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, mut job: Job) -> JobResult<Job> {
        let mut state = self.state.lock();

        let id = match job.id {
            Some(id) if state.jobs.contains_key(&id) => {
                return Err(JobError::InvalidState(format!("job {} already exists", id)));
            }
            Some(id) => id,
            None => {
                state.next_id += 1;
                while state.jobs.contains_key(&JobId::new(state.next_id)) {
                    state.next_id += 1;
                }
                JobId::new(state.next_id)
            }
        };
        job.assign_id(id)?;
        state.next_id = state.next_id.max(id.get());

        state.jobs.insert(
            id,
            StoredJob {
                job: job.clone(),
                deleted_at: None,
            },
        );
        debug!(job_id = %id, job_name = %job.name, "Job created");
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> JobResult<Job> {
        let mut state = self.state.lock();
        state.get_mut(id).map(|job| job.clone())
    }

    async fn update_job(&self, job: &Job) -> JobResult<()> {
        let id = job.require_id()?;
        let mut state = self.state.lock();
        let stored = state.get_mut(id)?;
        *stored = job.clone();
        Ok(())
    }

    async fn get_next_job(&self) -> JobResult<Option<Job>> {
        let state = self.state.lock();
        Ok(state
            .live()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by(|a, b| selection_order(a, b))
            .cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter, limit: u32, offset: u32) -> JobResult<Vec<Job>> {
        let state = self.state.lock();
        let mut jobs: Vec<Job> = state.live().filter(|job| filter.matches(job)).cloned().collect();
        jobs.sort_by(listing_order);

        Ok(jobs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_jobs(&self, filter: &JobFilter) -> JobResult<u64> {
        let state = self.state.lock();
        Ok(state.live().filter(|job| filter.matches(job)).count() as u64)
    }

    async fn mark_job_started(&self, id: JobId) -> JobResult<Job> {
        let mut state = self.state.lock();
        let job = state.get_mut(id)?;

        if job.status != JobStatus::Pending {
            return Err(JobError::InvalidState(format!(
                "job {} is {} and cannot be claimed",
                id, job.status
            )));
        }
        job.mark_running(Utc::now())?;
        Ok(job.clone())
    }

    async fn mark_job_completed(&self, id: JobId, result: Option<Value>) -> JobResult<Job> {
        let mut state = self.state.lock();
        let job = state.get_mut(id)?;
        job.mark_completed(result, Utc::now())?;
        Ok(job.clone())
    }

    async fn mark_job_failed(&self, id: JobId, result: Value) -> JobResult<Job> {
        let mut state = self.state.lock();
        let job = state.get_mut(id)?;
        job.record_failure_with(result, Utc::now())?;
        Ok(job.clone())
    }

    async fn claim_next_job(&self) -> JobResult<Option<Job>> {
        let mut state = self.state.lock();
        let Some(id) = state.next_pending_id() else {
            return Ok(None);
        };

        let job = state.get_mut(id)?;
        job.mark_running(Utc::now())?;
        Ok(Some(job.clone()))
    }

    async fn cancel_job(&self, id: JobId) -> JobResult<Job> {
        let mut state = self.state.lock();
        let job = state.get_mut(id)?;
        job.cancel()?;
        debug!(job_id = %id, "Job cancelled");
        Ok(job.clone())
    }

    async fn delete_job(&self, id: JobId) -> JobResult<()> {
        let mut state = self.state.lock();
        match state.jobs.get_mut(&id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(Utc::now());
                debug!(job_id = %id, "Job soft-deleted");
                Ok(())
            }
            _ => Err(JobError::NotFound(id)),
        }
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn seeded() -> InMemoryJobStore {
        let store = InMemoryJobStore::new();
        let base = Utc::now();
        store
            .create_job(Job::new("email", "a").with_priority(1).with_created_at(base))
            .await
            .unwrap();
        store
            .create_job(
                Job::new("compress", "b")
                    .with_priority(5)
                    .with_owner("ops")
                    .with_created_at(base + Duration::seconds(1)),
            )
            .await
            .unwrap();
        store
            .create_job(
                Job::new("email", "c")
                    .with_priority(5)
                    .with_created_at(base + Duration::seconds(2)),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = InMemoryJobStore::new();
        let a = store.create_job(Job::new("email", "x")).await.unwrap();
        let b = store.create_job(Job::new("email", "y")).await.unwrap();
        assert_ne!(a.id, b.id);

        let explicit = store.create_job(Job::new("email", "z").with_id(100)).await.unwrap();
        assert_eq!(explicit.id, Some(JobId::new(100)));
        assert!(store.create_job(Job::new("email", "z").with_id(100)).await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let store = InMemoryJobStore::new();
        assert!(matches!(store.get_job(JobId::new(1)).await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_follows_selection_order() {
        let store = seeded().await;

        let first = store.claim_next_job().await.unwrap().unwrap();
        let second = store.claim_next_job().await.unwrap().unwrap();
        let third = store.claim_next_job().await.unwrap().unwrap();

        assert_eq!((first.name.as_str(), first.priority), ("compress", 5));
        assert_eq!((second.name.as_str(), second.priority), ("email", 5));
        assert_eq!(third.priority, 1);
        assert_eq!(first.status, JobStatus::Running);
        assert!(first.started_at.is_some());
        assert!(store.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_started_rejects_second_claim() {
        let store = InMemoryJobStore::new();
        let job = store.create_job(Job::new("email", "x")).await.unwrap();
        let id = job.id.unwrap();

        store.mark_job_started(id).await.unwrap();
        assert!(matches!(store.mark_job_started(id).await, Err(JobError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_mark_failed_retries_then_fails() {
        let store = InMemoryJobStore::new();
        let job = store
            .create_job(Job::new("email", "x").with_max_retries(1))
            .await
            .unwrap();
        let id = job.id.unwrap();

        store.mark_job_started(id).await.unwrap();
        let retried = store.mark_job_failed(id, json!({"error": "boom"})).await.unwrap();
        assert_eq!((retried.status, retried.retries), (JobStatus::Pending, 1));

        store.mark_job_started(id).await.unwrap();
        let failed = store.mark_job_failed(id, json!({"error": "boom"})).await.unwrap();
        assert_eq!((failed.status, failed.retries), (JobStatus::Failed, 1));
        assert_eq!(failed.result, Some(json!({"error": "boom"})));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_and_count_with_filter() {
        let store = seeded().await;

        let all = store.list_jobs(&JobFilter::new(), 10, 0).await.unwrap();
        let payloads: Vec<&Value> = all.iter().map(|job| &job.payload).collect();
        assert_eq!(payloads, vec![&json!("c"), &json!("b"), &json!("a")]);

        let page = store.list_jobs(&JobFilter::new(), 1, 1).await.unwrap();
        assert_eq!(page[0].payload, json!("b"));

        assert_eq!(store.count_jobs(&JobFilter::new().name("email")).await.unwrap(), 2);
        assert_eq!(store.count_jobs(&JobFilter::new().owner("ops")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_soft_delete() {
        let store = seeded().await;
        let next = store.get_next_job().await.unwrap().unwrap();
        let id = next.id.unwrap();

        let cancelled = store.cancel_job(id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_ne!(store.get_next_job().await.unwrap().and_then(|j| j.id), Some(id));

        let other = store.get_next_job().await.unwrap().unwrap().id.unwrap();
        store.delete_job(other).await.unwrap();
        assert!(matches!(store.get_job(other).await, Err(JobError::NotFound(_))));
        assert!(store.delete_job(other).await.is_err());
        assert_eq!(store.len(), 2);
    }
}
