//! Redis-backed transport.

mod queue;

pub use queue::RedisTransport;

use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use jqueue_config::RedisConfig;
use tracing::info;

/// Create a Redis connection pool.
///
/// Each worker holds one connection for the duration of a blocking pop, so
/// `pool_size` should be at least the worker concurrency plus producers.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(queue = %config.queue_name, "Creating Redis connection pool for transport...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}
