//! # Live Data Server
//!
//! Consumes the event log and fans every event out to the WebSocket
//! subscribers of the channels it belongs to (`/ws/raw`, `/ws/structured`).
//!
//! ## Lifecycle:
//! 1. Load configuration (defaults, config file, environment, flags).
//! 2. Start logging.
//! 3. Spawn the ingestion pipeline. It connects in the background, so the
//!    HTTP side is reachable while the log is still unavailable.
//! 4. Serve until `SIGINT`/`SIGTERM` or a permanent source failure, then
//!    close every subscriber and drain.
//!
//! A permanent source failure (unknown topic, rejected credentials) ends the
//! process with a non-zero exit code.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod shared;

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_streamgate::configs::{LiveConfig, LiveSettings};
use lib_streamgate::core::{Broadcaster, ConnectionRegistry, PipelineStats};
use lib_streamgate::error::SourceError;
use lib_streamgate::ingestors::kafka::KafkaConnector;
use lib_streamgate::ingestors::{Backoff, EventSourceClient, Pipeline};
use lib_streamgate::loggers::setup_logging;
use lib_streamgate::routes::live::{self, LiveState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::install_crypto_provider()?;
    dotenvy::dotenv().ok();

    // 1. Configuration
    let settings = LiveConfig::load(LiveConfig::parse())?;

    // 2. Logging; the guard flushes the file appender on exit
    let _log_guard = setup_logging(&settings.log)?;
    info!(
        brokers = %settings.source.brokers,
        topic = %settings.source.topic,
        group = %settings.source.group_id,
        "live data server booting"
    );

    // 3. Fan-out engine and ingestion
    let registry = Arc::new(ConnectionRegistry::new());
    let stats = Arc::new(PipelineStats::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&stats));
    let shutdown = CancellationToken::new();

    let pipeline = tokio::spawn(run_ingestion(
        settings.clone(),
        broadcaster,
        Arc::clone(&stats),
        shutdown.clone(),
    ));

    // 4. HTTP / WebSocket surface
    let state = LiveState {
        registry: Arc::clone(&registry),
        stats,
        queue_capacity: settings.queue_capacity,
        write_timeout: settings.write_timeout,
    };
    let app = shared::with_http_layers(live::router(state), settings.server.request_timeout);

    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shared::shutdown_signal() => warn!("shutdown signal received"),
            _ = signal_shutdown.cancelled() => warn!("ingestion stopped, shutting down"),
        }
        signal_shutdown.cancel();
        let closed = registry.close_all();
        info!(closed, "subscribers closed");
        signal_handle.graceful_shutdown(Some(shared::DRAIN_TIMEOUT));
    });

    let served = shared::serve(app, &settings.server, handle).await;
    shutdown.cancel();

    // 5. The exit status reflects how ingestion ended
    let ingestion = pipeline
        .await
        .map_err(|e| anyhow::anyhow!("ingestion task panicked: {}", e))?;
    served?;
    ingestion.map_err(|e| anyhow::anyhow!("event source failed: {}", e))?;

    info!("live data server stopped");
    Ok(())
}

/// Connects to the log and runs the pipeline until `shutdown` fires. A
/// permanent failure cancels `shutdown` itself so the server stops too.
async fn run_ingestion(
    settings: LiveSettings,
    broadcaster: Broadcaster,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) -> Result<(), SourceError> {
    let backoff = Backoff::new(settings.reconnect_base_delay, settings.reconnect_max_delay);

    let connected = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        client = EventSourceClient::connect(
            KafkaConnector::new(),
            settings.source.clone(),
            backoff,
            Arc::clone(&stats),
        ) => client,
    };

    let result = match connected {
        Ok(source) => Pipeline::new(source, broadcaster, stats).run(shutdown.clone()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        error!(error = %e, "ingestion failed permanently");
        shutdown.cancel();
    }
    result
}
