//! Lens Cloud Run Worker
//!
//! HTTP server receiving backfill and discovery tasks from Cloud Tasks.
//!
//! # Architecture
//!
//! - POST /tasks/backfill/schedule - Plan a sink's backfill, enqueue one task per unit
//! - POST /tasks/backfill/execute - Backfill one (project, day) unit
//! - POST /tasks/discovery/tables - Inventory the tenant's tables
//! - GET /health, GET /metrics
//!
//! # Configuration
//!
//! Environment variables:
//! - PORT, LENS_HMAC_SECRET, DATABASE_URL - see [`WorkerConfig`]
//! - GCP_* - see [`GcpConfig`]
//! - LENS_* scheduler settings - see [`SchedulerConfig`]

use anyhow::{Context, Result};
use lens_cloud_gcp::{BigQueryClient, CloudTasksQueue, GcpAuth, GcpConfig, ResourceManagerClient};
use lens_runtime::{
    BackfillScheduler, ExecutorConfig, SchedulerConfig, TablesDiscovery, TablesDiscoveryConfig,
    UnitExecutor,
};
use lens_storage::{InMemoryProgressStore, PostgresProgressStore, ProgressStore, ProgressTracker};
use lens_worker::config::{mask_password, WorkerConfig};
use lens_worker::{router, AppState};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // JSON output for Cloud Logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lens_worker=info,lens_runtime=info,lens_cloud_gcp=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Lens worker");

    if let Err(e) = run().await {
        error!(error = ?e, "Worker failed");
        std::process::exit(1);
    }

    info!("Server shut down gracefully");
}

async fn run() -> Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;
    let gcp = GcpConfig::from_env().context("Failed to load GCP configuration")?;
    let scheduler_config =
        SchedulerConfig::from_env().context("Failed to load scheduler configuration")?;

    info!(
        port = config.port,
        project = %gcp.project_id,
        queue = %gcp.queue_name,
        timeout_seconds = config.request_timeout.as_secs(),
        "Configuration loaded"
    );

    let store = progress_store(&config).await?;
    let tracker = ProgressTracker::new(store);

    let auth = Arc::new(
        GcpAuth::auto(gcp.service_account_key_json.as_deref())
            .await
            .context("Failed to initialize GCP credentials")?,
    );
    let bigquery = BigQueryClient::new(auth.clone(), gcp.project_id.clone())?;
    let projects = Arc::new(ResourceManagerClient::new(auth.clone())?);
    let queue = Arc::new(CloudTasksQueue::new(&gcp, auth)?);

    let executor_config = ExecutorConfig {
        dataset: scheduler_config.backfill_dataset.clone(),
        table: scheduler_config.backfill_table.clone(),
        ..ExecutorConfig::default()
    };
    let discovery_config = TablesDiscoveryConfig {
        workers: scheduler_config.discovery_workers,
        ..TablesDiscoveryConfig::default()
    };

    let engine = Arc::new(bigquery);
    let scheduler = BackfillScheduler::new(
        tracker.clone(),
        projects.clone(),
        engine.clone(),
        engine.clone(),
        queue,
        scheduler_config,
    );
    let executor = UnitExecutor::new(tracker, engine.clone(), engine.clone(), executor_config);
    let discovery = TablesDiscovery::new(
        projects,
        engine.clone(),
        engine.clone(),
        engine,
        discovery_config,
    )?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        scheduler: Arc::new(scheduler),
        executor: Arc::new(executor),
        discovery: Arc::new(discovery),
        hmac_secret: config.hmac_secret.clone(),
        shutdown: shutdown.clone(),
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {addr}"))?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;
    Ok(())
}

async fn progress_store(config: &WorkerConfig) -> Result<Arc<dyn ProgressStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresProgressStore::connect(url)
                .await
                .with_context(|| format!("Failed to connect to {}", mask_password(url)))?;
            store.migrate().await.context("Failed to run migrations")?;
            info!(database_url = %mask_password(url), "Progress store initialized");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, progress is kept in memory only");
            Ok(Arc::new(InMemoryProgressStore::new()))
        }
    }
}

/// Waits for SIGTERM (Cloud Run shutdown signal) or Ctrl-C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
