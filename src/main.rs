//! Courier: reliable webhook delivery and task dispatch for compliance
//! claim processing.
//!
//! Composition root: loads configuration, connects the store, wires the
//! queue, worker pools, delivery engine, and HTTP server, and coordinates
//! graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_core::{
    status::StatusManager,
    store::{PostgresStore, StatusStore},
    time::{Clock, RealClock},
};
use courier_delivery::{
    circuit::CircuitBreakerRegistry,
    client::DeliveryClient,
    compute::{ClaimProcessor, ComputeRunner, SummaryProcessor},
    deliver::WebhookDeliverer,
};
use courier_queue::{PostgresQueue, TaskQueue, WorkerPool};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("starting courier webhook delivery service");
    info!(
        store_url = %config.store_url_masked(),
        compute_concurrency = config.compute_concurrency,
        delivery_concurrency = config.delivery_concurrency,
        "configuration loaded"
    );

    let pool = create_store_pool(&config).await?;
    info!("store connection pool established");

    run_migrations(&pool).await?;
    info!("store migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let store: Arc<dyn StatusStore> = Arc::new(PostgresStore::new(pool.clone()));
    let status = Arc::new(StatusManager::new(store, clock.clone()));
    let queue: Arc<dyn TaskQueue> =
        Arc::new(PostgresQueue::new(pool.clone()).with_max_depth(config.queue_max_depth));
    let breakers =
        Arc::new(CircuitBreakerRegistry::new(config.to_circuit_config(), clock.clone()));
    let url_policy = config.to_url_policy()?;
    let processor: Arc<dyn ClaimProcessor> = Arc::new(SummaryProcessor);

    let metrics_handle = if config.enable_metrics {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
        courier_delivery::metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    let client = DeliveryClient::new(config.to_client_config())
        .map_err(|e| anyhow::anyhow!("failed to build delivery client: {e}"))?;
    let deliverer = Arc::new(WebhookDeliverer::new(
        status.clone(),
        queue.clone(),
        client,
        breakers.clone(),
        config.to_retry_policy(),
        url_policy.clone(),
        clock.clone(),
    ));
    let compute_runner = Arc::new(ComputeRunner::new(
        processor.clone(),
        status.clone(),
        queue.clone(),
        config.to_compute_config(),
        clock.clone(),
    ));

    let cancellation = CancellationToken::new();
    let compute_pool = WorkerPool::spawn(
        config.compute_worker_config(),
        queue.clone(),
        compute_runner,
        clock.clone(),
        cancellation.child_token(),
    );
    let delivery_pool = WorkerPool::spawn(
        config.delivery_worker_config(),
        queue.clone(),
        deliverer,
        clock.clone(),
        cancellation.child_token(),
    );
    info!("worker pools started");

    let state = AppState {
        status,
        queue,
        breakers,
        processor,
        url_policy: Arc::new(url_policy),
        clock,
        heartbeats: vec![compute_pool.heartbeats(), delivery_pool.heartbeats()],
        delivery_max_attempts: config.delivery_max_attempts,
        sync_compute_timeout: Duration::from_secs(config.request_timeout),
        metrics_handle,
    };

    if config.enable_metrics {
        let metrics_addr = config.parse_metrics_addr()?;
        let metrics_app = courier_api::server::metrics_router(state.clone());
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(metrics_addr).await {
                Ok(listener) => {
                    info!(addr = %metrics_addr, "metrics listener started");
                    if let Err(e) = axum::serve(listener, metrics_app).await {
                        error!(error = %e, "metrics listener failed");
                    }
                },
                Err(e) => error!(error = %e, "failed to bind metrics listener"),
            }
        });
    }

    let addr = config.parse_server_addr()?;
    info!(addr = %addr, "courier is ready to accept claims");
    courier_api::start_server(state, Duration::from_secs(config.request_timeout), addr)
        .await
        .context("HTTP server failed")?;

    info!("shutdown signal received, draining workers");
    cancellation.cancel();
    if let Err(e) = compute_pool.shutdown_graceful().await {
        error!(error = %e, "compute pool did not drain cleanly");
    }
    if let Err(e) = delivery_pool.shutdown_graceful().await {
        error!(error = %e, "delivery pool did not drain cleanly");
    }

    pool.close().await;
    info!("courier shutdown complete");
    Ok(())
}

/// Initializes tracing with structured logging.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the store connection pool with bounded connect retries.
async fn create_store_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.store_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.store_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify store connection")?;
                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(attempt = retries, max_retries = MAX_RETRIES, "store connection failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create store connection pool after retries");
            },
        }
    }
}

/// Creates the store tables when missing. Idempotent.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_status (
            key TEXT PRIMARY KEY,
            reference_id TEXT NOT NULL,
            status TEXT NOT NULL,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_status table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS dead_letters (
            key TEXT PRIMARY KEY,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create dead_letters table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS task_status (
            key TEXT PRIMARY KEY,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create task_status table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS queue_tasks (
            id BIGSERIAL PRIMARY KEY,
            queue TEXT NOT NULL,
            task JSONB NOT NULL,
            eta TIMESTAMPTZ,
            lease_expires_at TIMESTAMPTZ,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create queue_tasks table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_status_scan
        ON webhook_status (reference_id, status, expires_at)
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_status index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_queue_tasks_claim
        ON queue_tasks (queue, id)
        WHERE lease_expires_at IS NULL
        ",
    )
    .execute(pool)
    .await
    .context("failed to create queue_tasks index")?;

    Ok(())
}
