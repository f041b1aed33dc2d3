//! # Server Plumbing
//!
//! Listener, middleware and signal handling shared by both binaries.

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use lib_streamgate::configs::ServerSettings;

/// Grace period for in-flight requests once shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Adds request tracing, permissive CORS and the per-request timeout.
pub fn with_http_layers(app: Router, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    app.layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// # Serve
///
/// Binds `server.bind`, over TLS when certificate paths are configured, and
/// runs until `handle` is told to shut down.
pub async fn serve(app: Router, server: &ServerSettings, handle: Handle) -> anyhow::Result<()> {
    let service = app.into_make_service();
    match &server.tls {
        Some(tls) => {
            info!(cert = %tls.cert.display(), "loading TLS certificate");
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| anyhow::anyhow!("TLS Configuration Error: {}", e))?;
            info!(addr = %server.bind, "listening (https)");
            axum_server::bind_rustls(server.bind, tls_config)
                .handle(handle)
                .serve(service)
                .await?;
        }
        None => {
            info!(addr = %server.bind, "listening (http)");
            axum_server::bind(server.bind).handle(handle).serve(service).await?;
        }
    }
    Ok(())
}

/// # Graceful Shutdown Signal Handler
///
/// Resolves on `CTRL+C` or, on UNIX, `SIGTERM`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Installs `ring` as the process-wide rustls provider.
pub fn install_crypto_provider() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))
}
