//! # jqueue Worker
//!
//! Runs a worker pool against the configured transport and job store.
//!
//! Dispatch modes:
//! - **transport**: FIFO consumption of the Redis list, claims tracked in the store when enabled
//! - **polling**: priority-ordered claims straight from the PostgreSQL store

use anyhow::Context;
use jqueue_config::{AppConfig, ConfigLoader, DispatchMode, LoggingConfig, MetricsConfig};
use jqueue_jobs::{
    create_pool, register_metrics, HandlerError, HandlerRegistry, JobStore, PostgresJobStore,
    RedisTransport, RetryPolicy, TransportQueue, WorkerPool, WorkerPoolConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    #[serde(default)]
    subject: String,
}

#[derive(Debug, Deserialize)]
struct CompressPayload {
    path: String,
}

#[tokio::main]
async fn main() {
    let config = match ConfigLoader::from_default_location().load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    info!("Starting jqueue worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Environment: {}", config.environment);
    info!("Dispatch mode: {}", config.worker.mode);

    init_metrics(&config.metrics)?;

    let store: Option<Arc<dyn JobStore>> = if config.database.enabled {
        let store = PostgresJobStore::connect(&config.database)
            .await
            .context("connecting to job store")?;
        Some(Arc::new(store))
    } else {
        None
    };

    let transport: Option<Arc<dyn TransportQueue>> = match config.worker.mode {
        DispatchMode::Transport => {
            let pool = create_pool(&config.redis).await.context("connecting to Redis")?;
            Some(Arc::new(RedisTransport::new(pool, config.redis.queue_name.clone())))
        }
        DispatchMode::Polling => None,
    };

    let pool_config =
        WorkerPoolConfig::from(&config.worker).with_retry_policy(RetryPolicy::from(&config.retry));

    let mut pool = WorkerPool::new(Arc::new(build_registry()), pool_config);
    if let Some(transport) = transport {
        pool = pool.with_transport(transport);
    }
    if let Some(store) = store {
        pool = pool.with_store(store);
    }

    let handle = pool.start().context("starting worker pool")?;

    shutdown_signal().await;

    let stats = handle.shutdown().await;
    info!(
        processed = stats.jobs_processed,
        failed = stats.jobs_failed,
        retried = stats.jobs_retried,
        "Worker stopped"
    );
    Ok(())
}

fn build_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();

    registry.register_typed("email", |payload: EmailPayload| async move {
        if payload.to.is_empty() {
            return Err(HandlerError::new("email recipient is empty"));
        }
        info!(to = %payload.to, subject = %payload.subject, "Sending email");
        Ok::<(), HandlerError>(())
    });

    registry.register_typed("compress", |payload: CompressPayload| async move {
        let metadata = tokio::fs::metadata(&payload.path)
            .await
            .map_err(|e| HandlerError::new(format!("{}: {}", payload.path, e)))?;
        info!(path = %payload.path, bytes = metadata.len(), "Compressing file");
        Ok::<(), HandlerError>(())
    });

    registry
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid metrics listen address: {}", config.listen))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;
    register_metrics();

    info!("Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
