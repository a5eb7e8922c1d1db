//! Integration tests for PostgresJobStore.
//!
//! These tests run against a real PostgreSQL database using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use chrono::{Duration, Utc};
use common::TestDatabase;
use jqueue_jobs::{Job, JobError, JobFilter, JobId, JobStatus, JobStore};
use serde_json::json;

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_and_get_job() {
    let db = TestDatabase::new().await;
    let store = db.store();

    let created = store
        .create_job(Job::new("email", json!({"to": "a@example.com"})).with_priority(3).with_owner("ops"))
        .await
        .expect("Failed to create job");
    let id = created.id.expect("id assigned");

    let found = store.get_job(id).await.expect("Failed to get job");
    assert_eq!(found.name, "email");
    assert_eq!(found.status, JobStatus::Pending);
    assert_eq!(found.priority, 3);
    assert_eq!(found.owner.as_deref(), Some("ops"));
    assert_eq!(found.payload, json!({"to": "a@example.com"}));
    assert_eq!(found.retries, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_get_missing_job() {
    let db = TestDatabase::new().await;
    let store = db.store();

    let result = store.get_job(JobId::new(9999)).await;
    assert!(matches!(result, Err(JobError::NotFound(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claim_next_job_by_priority() {
    let db = TestDatabase::new().await;
    let store = db.store();
    let base = Utc::now();

    store
        .create_job(Job::new("low", "a").with_priority(1).with_created_at(base))
        .await
        .unwrap();
    store
        .create_job(Job::new("high", "b").with_priority(5).with_created_at(base + Duration::seconds(1)))
        .await
        .unwrap();

    let first = store.claim_next_job().await.unwrap().expect("job claimed");
    assert_eq!(first.name, "high");
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.started_at.is_some());

    let second = store.claim_next_job().await.unwrap().expect("job claimed");
    assert_eq!(second.name, "low");
    assert!(store.claim_next_job().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mark_started_twice_is_rejected() {
    let db = TestDatabase::new().await;
    let store = db.store();

    let id = store.create_job(Job::new("email", "x")).await.unwrap().id.unwrap();
    store.mark_job_started(id).await.unwrap();

    let second = store.mark_job_started(id).await;
    assert!(matches!(second, Err(JobError::InvalidState(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_complete_and_fail_lifecycle() {
    let db = TestDatabase::new().await;
    let store = db.store();

    let done = store.create_job(Job::new("email", "x")).await.unwrap().id.unwrap();
    store.mark_job_started(done).await.unwrap();
    let completed = store.mark_job_completed(done, Some(json!({"sent": true}))).await.unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.completed_at.is_some());

    let flaky = store
        .create_job(Job::new("email", "y").with_max_retries(1))
        .await
        .unwrap()
        .id
        .unwrap();
    store.mark_job_started(flaky).await.unwrap();
    let retried = store.mark_job_failed(flaky, json!({"error": "boom"})).await.unwrap();
    assert_eq!((retried.status, retried.retries), (JobStatus::Pending, 1));

    store.mark_job_started(flaky).await.unwrap();
    let failed = store.mark_job_failed(flaky, json!({"error": "boom"})).await.unwrap();
    assert_eq!((failed.status, failed.retries), (JobStatus::Failed, 1));
    assert_eq!(failed.result, Some(json!({"error": "boom"})));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_list_count_cancel_and_delete() {
    let db = TestDatabase::new().await;
    let store = db.store();

    for i in 0..3 {
        store
            .create_job(Job::new("report", json!({ "n": i })).with_owner("alice"))
            .await
            .unwrap();
    }
    let other = store.create_job(Job::new("email", "x")).await.unwrap().id.unwrap();

    let filter = JobFilter::new().owner("alice");
    assert_eq!(store.count_jobs(&filter).await.unwrap(), 3);
    assert_eq!(store.list_jobs(&filter, 2, 0).await.unwrap().len(), 2);
    assert_eq!(store.list_jobs(&filter, 2, 2).await.unwrap().len(), 1);

    let cancelled = store.cancel_job(other).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(store.mark_job_started(other).await.is_err());

    store.delete_job(other).await.unwrap();
    assert!(matches!(store.get_job(other).await, Err(JobError::NotFound(_))));
    assert_eq!(store.count_jobs(&JobFilter::new()).await.unwrap(), 3);
}
