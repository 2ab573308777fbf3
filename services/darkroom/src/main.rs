use anyhow::{Context, Result};
use darkroom::{
    start_api_server, AppState, Config, MetadataStore, PipelineSettings, RenderPipeline,
    S3BlobStore, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting darkroom service"
    );

    init_metrics(config.service.metrics_port)?;

    let metadata_store = Arc::new(
        MetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blob_store = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 blob store")?,
    );
    if let Err(e) = blob_store.head_bucket().await {
        // Uploads will fail until the bucket is reachable; reads of stored photos still work
        warn!(bucket = blob_store.bucket(), error = %e, "S3 bucket check failed");
    }

    let pipeline = Arc::new(RenderPipeline::new(
        metadata_store,
        blob_store,
        Arc::new(SystemClock),
        PipelineSettings::from(&config),
    ));

    let shutdown = CancellationToken::new();

    let sweeper_handle = tokio::spawn(sweep_sessions(pipeline.clone(), shutdown.clone()));

    let api_state = AppState::new(pipeline, shutdown.clone());
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Darkroom service started successfully");

    shutdown_signal().await;

    info!("Shutting down darkroom service");

    shutdown.cancel();
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed");
    }
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Session sweeper task failed");
    }

    info!("Darkroom service stopped");

    Ok(())
}

/// Drop idle guest sessions until shutdown
async fn sweep_sessions(pipeline: Arc<RenderPipeline>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                pipeline.sweep_sessions();
                metrics::gauge!("darkroom.sessions.active").set(pipeline.sessions().len() as f64);
            }
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
