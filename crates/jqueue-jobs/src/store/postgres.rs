//! Postgres job store.

use super::{JobFilter, JobStore};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jqueue_config::DatabaseConfig;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

const JOB_COLUMNS: &str = "id, name, status, priority, payload, result, retries, max_retries, \
                           owner, created_at, started_at, completed_at";

/// Database row representation of a job.
#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    name: String,
    status: String,
    priority: i32,
    payload: Value,
    result: Option<Value>,
    retries: i32,
    max_retries: i32,
    owner: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: Some(JobId::new(row.id)),
            name: row.name,
            status: row.status.parse()?,
            priority: row.priority,
            payload: row.payload,
            result: row.result,
            retries: from_db_count(row.retries)?,
            max_retries: from_db_count(row.max_retries)?,
            owner: row.owner,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn from_db_count(value: i32) -> JobResult<u32> {
    u32::try_from(value).map_err(|_| JobError::InvalidState(format!("negative retry count: {}", value)))
}

fn to_db_count(value: u32) -> JobResult<i32> {
    i32::try_from(value).map_err(|_| JobError::InvalidState(format!("retry count too large: {}", value)))
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    builder.push(" WHERE deleted_at IS NULL");

    if let Some(id) = filter.id {
        builder.push(" AND id = ").push_bind(id.get());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority);
    }
    if let Some(owner) = &filter.owner {
        builder.push(" AND owner = ").push_bind(owner.clone());
    }
    if let Some(name) = &filter.name {
        builder.push(" AND name = ").push_bind(name.clone());
    }
}

/// Job store backed by a Postgres `jobs` table.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Creates a connection pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> JobResult<Self> {
        info!("Connecting to Postgres job store...");

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                JobError::StoreUnavailable(format!("Failed to connect: {}", e))
            })?;

        info!("Postgres connection pool established");
        let store = Self { pool };

        if config.run_migrations {
            store.run_migrations().await?;
        }

        Ok(store)
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> JobResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Closes the pool.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
    }

    async fn write_back(conn: &mut PgConnection, job: &Job) -> JobResult<u64> {
        let id = job.require_id()?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = $2, status = $3, priority = $4, payload = $5, result = $6,
                retries = $7, max_retries = $8, owner = $9, started_at = $10,
                completed_at = $11, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&job.payload)
        .bind(&job.result)
        .bind(to_db_count(job.retries)?)
        .bind(to_db_count(job.max_retries)?)
        .bind(&job.owner)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Locks the row, applies a lifecycle transition in memory and persists it
    /// in the same transaction.
    async fn transition<F>(&self, id: JobId, apply: F) -> JobResult<Job>
    where
        F: FnOnce(&mut Job) -> JobResult<()> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(JobError::NotFound(id))?;

        let mut job = Job::try_from(row)?;
        apply(&mut job)?;
        Self::write_back(&mut tx, &job).await?;

        tx.commit().await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(&self, job: Job) -> JobResult<Job> {
        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO jobs (");
        if job.id.is_some() {
            builder.push("id, ");
        }
        builder.push(
            "name, status, priority, payload, result, retries, max_retries, owner, \
             created_at, started_at, completed_at) VALUES (",
        );

        let mut values = builder.separated(", ");
        if let Some(id) = job.id {
            values.push_bind(id.get());
        }
        values
            .push_bind(job.name.clone())
            .push_bind(job.status.as_str())
            .push_bind(job.priority)
            .push_bind(job.payload.clone())
            .push_bind(job.result.clone())
            .push_bind(to_db_count(job.retries)?)
            .push_bind(to_db_count(job.max_retries)?)
            .push_bind(job.owner.clone())
            .push_bind(job.created_at)
            .push_bind(job.started_at)
            .push_bind(job.completed_at);
        values.push_unseparated(") RETURNING ");
        builder.push(JOB_COLUMNS);

        let row: JobRow = builder.build_query_as().fetch_one(&self.pool).await?;
        let created = Job::try_from(row)?;

        debug!(job_id = %created.display_id(), job_name = %created.name, "Job created");
        Ok(created)
    }

    async fn get_job(&self, id: JobId) -> JobResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(JobError::NotFound(id)).and_then(Job::try_from)
    }

    async fn update_job(&self, job: &Job) -> JobResult<()> {
        let mut conn = self.pool.acquire().await?;
        match Self::write_back(&mut conn, job).await? {
            0 => Err(JobError::NotFound(job.require_id()?)),
            _ => Ok(()),
        }
    }

    async fn get_next_job(&self) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'pending' AND deleted_at IS NULL
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter, limit: u32, offset: u32) -> JobResult<Vec<Job>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY priority DESC, created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows: Vec<JobRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_jobs(&self, filter: &JobFilter) -> JobResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut builder, filter);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn mark_job_started(&self, id: JobId) -> JobResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => {
                // Distinguish a lost claim from a missing record.
                let current = self.get_job(id).await?;
                Err(JobError::InvalidState(format!(
                    "job {} is {} and cannot be claimed",
                    id, current.status
                )))
            }
        }
    }

    async fn mark_job_completed(&self, id: JobId, result: Option<Value>) -> JobResult<Job> {
        self.transition(id, move |job| job.mark_completed(result, Utc::now()))
            .await
    }

    async fn mark_job_failed(&self, id: JobId, result: Value) -> JobResult<Job> {
        self.transition(id, move |job| {
            job.record_failure_with(result, Utc::now()).map(|_| ())
        })
        .await
    }

    async fn claim_next_job(&self) -> JobResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND deleted_at IS NULL
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn cancel_job(&self, id: JobId) -> JobResult<Job> {
        let job = self.transition(id, Job::cancel).await?;
        debug!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    async fn delete_job(&self, id: JobId) -> JobResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::NotFound(id));
        }
        debug!(job_id = %id, "Job soft-deleted");
        Ok(())
    }

    async fn health_check(&self) -> JobResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresJobStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: &str, retries: i32) -> JobRow {
        JobRow {
            id: 7,
            name: "email".to_string(),
            status: status.to_string(),
            priority: 1,
            payload: json!("x"),
            result: None,
            retries,
            max_retries: 3,
            owner: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_row_conversion() {
        let job = Job::try_from(row("running", 2)).unwrap();
        assert_eq!(job.id, Some(JobId::new(7)));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.retries, 2);
    }

    #[test]
    fn test_row_conversion_rejects_bad_values() {
        assert!(Job::try_from(row("sleeping", 0)).is_err());
        assert!(Job::try_from(row("pending", -1)).is_err());
    }

    #[test]
    fn test_filter_sql() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filter(
            &mut builder,
            &JobFilter::new().status(JobStatus::Pending).owner("ops"),
        );
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM jobs WHERE deleted_at IS NULL AND status = $1 AND owner = $2"
        );
    }
}
