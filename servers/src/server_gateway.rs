//! # Gateway Server
//!
//! Public entry point under `/gateway/v1`: cached, single-flight reads of the
//! static transaction data and a WebSocket tunnel to the live-data server.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod shared;

use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use lib_streamgate::cache::CacheStore;
use lib_streamgate::configs::GatewayConfig;
use lib_streamgate::loggers::setup_logging;
use lib_streamgate::retrieve::UpstreamClient;
use lib_streamgate::routes::gateway::{self, GatewayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::install_crypto_provider()?;
    dotenvy::dotenv().ok();

    // 1. Configuration and logging
    let settings = GatewayConfig::load(GatewayConfig::parse())?;
    let _log_guard = setup_logging(&settings.log)?;
    info!(
        upstream = %settings.upstream_url,
        live_upstream = %settings.live_upstream_url,
        capacity = ?settings.cache_capacity,
        "gateway booting"
    );

    // 2. Cache and upstream client
    let cache = CacheStore::new(settings.cache_capacity, settings.fetch_timeout);
    let janitor = cache.spawn_janitor(settings.janitor_interval);
    let upstream = UpstreamClient::new(settings.upstream_url.as_str(), settings.fetch_timeout)
        .map_err(|e| anyhow::anyhow!("upstream client: {}", e))?;

    let state = GatewayState {
        cache: cache.clone(),
        upstream: Arc::new(upstream),
        ttl: settings.ttl,
        expose_cache_headers: settings.expose_cache_headers,
        live_upstream_url: settings.live_upstream_url.to_string(),
        tunnel_connect_timeout: settings.tunnel_connect_timeout,
        tunnel_idle_timeout: settings.tunnel_idle_timeout,
    };
    let app = shared::with_http_layers(gateway::router(state), settings.server.request_timeout);

    // 3. Serve until a signal; pending fills are cancelled on the way out
    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    let signal_cache = cache.clone();
    tokio::spawn(async move {
        shared::shutdown_signal().await;
        warn!("shutdown signal received");
        signal_cache.shutdown();
        signal_handle.graceful_shutdown(Some(shared::DRAIN_TIMEOUT));
    });

    let served = shared::serve(app, &settings.server, handle).await;
    cache.shutdown();
    janitor.abort();
    served?;

    info!("gateway stopped");
    Ok(())
}
