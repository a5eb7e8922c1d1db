//! jqueue Jobs - Background Job Queue
//!
//! A background job queue with:
//! - Jobs carrying a type name, JSON payload, priority and retry budget
//! - A handler registry mapping job types to async functions
//! - A Redis list transport with blocking dequeue
//! - A durable job store (PostgreSQL or in-memory) with atomic claims
//! - Priority-ordered scheduling for store polling
//! - A worker pool with in-place retries and exponential backoff
//!
//! # Architecture
//!
//! ```text
//!  Producer ──create_job──▶ JobStore ◀──claim_next_job── Scheduler
//!     │                        ▲                             │
//!     │ enqueue                │ mark_job_*                  │
//!     ▼                        │                             ▼
//!  TransportQueue ──dequeue──▶ WorkerPool ──resolve──▶ HandlerRegistry
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jqueue_jobs::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register_fn("email", |payload| async move {
//!     tracing::info!(%payload, "Sending email");
//!     Ok(())
//! });
//!
//! let transport = Arc::new(InMemoryTransport::default());
//! let producer = Producer::new(transport.clone());
//! producer.submit(Job::new("email", "user@example.com")).await?;
//!
//! let handle = WorkerPool::new(registry, WorkerPoolConfig::default())
//!     .with_transport(transport)
//!     .start()?;
//! let stats = handle.shutdown().await;
//! ```

pub mod error;
pub mod job;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod redis;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use error::{JobError, JobResult};
pub use job::{failure_result, FailureOutcome, Job, JobId, JobStatus, DEFAULT_MAX_RETRIES};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use producer::{Producer, DEFAULT_ENQUEUE_ATTEMPTS};
pub use queue::{InMemoryTransport, TransportQueue};
pub use crate::redis::{create_pool, RedisTransport};
pub use registry::{Handler, HandlerError, HandlerRegistry, HandlerResult};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{listing_order, selection_order, Scheduler};
pub use store::{InMemoryJobStore, JobFilter, JobStore, PostgresJobStore, DEFAULT_LIST_LIMIT};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerPoolStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::job::{Job, JobId, JobStatus};
    pub use crate::producer::Producer;
    pub use crate::queue::{InMemoryTransport, TransportQueue};
    pub use crate::registry::{HandlerError, HandlerRegistry, HandlerResult};
    pub use crate::retry::RetryPolicy;
    pub use crate::store::{InMemoryJobStore, JobStore};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
    pub use crate::{JobError, JobResult};
}
