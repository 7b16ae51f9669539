//! Cadence - campaign engine entry point

use anyhow::{Context, Result};
use cadence_api::{create_router, AppState};
use cadence_common::config::{Config, GmailConfig, LoggingConfig};
use cadence_core::{
    CampaignEngine, DryRunTransport, EngineMetrics, EnrollmentProcessor, GmailTransport,
    MailTransport, ProcessorOptions, ReplyDetector, TrackingInjector,
};
use cadence_storage::{DatabasePool, PgSequenceStore, SequenceStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Cadence campaign engine...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let store: Arc<dyn SequenceStore> = Arc::new(PgSequenceStore::new(db_pool));

    // Outbound mail
    let transport: Arc<dyn MailTransport> = if gmail_configured(&config.gmail) {
        info!(sender = ?config.gmail.sender, "Using Gmail transport");
        Arc::new(GmailTransport::from_config(&config.gmail)?)
    } else {
        warn!("Gmail is not configured, outbound mail will only be logged");
        Arc::new(DryRunTransport::new())
    };

    let metrics = Arc::new(EngineMetrics::new().context("Failed to register metrics")?);
    let injector = TrackingInjector::new(&config.tracking.base_url)?;

    let processor = EnrollmentProcessor::new(
        store.clone(),
        transport.clone(),
        injector,
        metrics.clone(),
    )
    .with_options(ProcessorOptions {
        batch_size: config.scheduler.batch_size.max(1),
        lease: chrono::Duration::seconds(config.scheduler.lease_secs.max(1)),
    });
    let replies = ReplyDetector::new(store.clone(), transport, metrics.clone());
    let engine = Arc::new(CampaignEngine::new(processor, replies, metrics.clone()));

    if config.scheduler.cron_secret.is_none() {
        warn!("scheduler.cron_secret is not set, the trigger and management API will reject every request");
    }

    // Optional in-process ticker
    let ticker_handle = config.scheduler.interval_secs.map(|secs| {
        let engine = engine.clone();
        tokio::spawn(engine.run_every(secs))
    });

    // Start API server
    let state = AppState::new(store, engine, metrics, config.scheduler.cron_secret.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = ticker_handle {
        handle.abort();
    }

    info!("Cadence shutdown complete");

    Ok(())
}

fn gmail_configured(config: &GmailConfig) -> bool {
    config.client_id.is_some() || config.refresh_token.is_some() || config.sender.is_some()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},cadence=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
