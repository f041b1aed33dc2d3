//! # Gateway Router
//!
//! Everything lives under `/gateway/v1`:
//!
//! - `GET /health`
//! - `GET /static/transactions`, `/static/transactions/filters`,
//!   `/static/transactions/dates`, `/static/transactions/{id}`: answered from
//!   the response cache, filled from `{upstream}/transactions[...]`.
//! - `GET /live`: WebSocket tunnel to the live-data service.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, CacheStore, CachedResponse, EndpointClass, Fingerprint, TtlPolicy};
use crate::retrieve::forwarder::UpstreamClient;
use crate::retrieve::tunnel::{connect_upstream, relay, upstream_legs};
use crate::routes::error::QueryError;
use crate::routes::frames::client_legs;

pub const API_PREFIX: &str = "/gateway/v1";

static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// # Application State
#[derive(Debug, Clone)]
pub struct GatewayState {
    pub cache: CacheStore,
    pub upstream: Arc<UpstreamClient>,
    pub ttl: TtlPolicy,
    /// Adds `x-cache`, `age` and `cache-control` to cached answers.
    pub expose_cache_headers: bool,
    /// WebSocket URL the `/live` tunnel connects to.
    pub live_upstream_url: String,
    /// Bound on opening the upstream side of a tunnel.
    pub tunnel_connect_timeout: Duration,
    /// A tunnel leg silent for this long is closed.
    pub tunnel_idle_timeout: Duration,
}

pub fn router(state: GatewayState) -> Router {
    let v1 = Router::new()
        .route("/health", get(health_handler))
        .route("/static/transactions", get(cached_query))
        .route("/static/transactions/filters", get(cached_query))
        .route("/static/transactions/dates", get(cached_query))
        .route("/static/transactions/{id}", get(cached_query))
        .route("/live", get(live_tunnel));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let stats = state.cache.stats();
    Json(json!({
        "status": "ok",
        "cache": {
            "entries": state.cache.len(),
            "inFlight": state.cache.in_flight(),
            "hits": stats.hits.load(Ordering::Relaxed),
            "misses": stats.misses.load(Ordering::Relaxed),
            "joins": stats.joins.load(Ordering::Relaxed),
            "fillFailures": stats.fill_failures.load(Ordering::Relaxed),
            "evictions": stats.evictions.load(Ordering::Relaxed),
        },
    }))
}

#[derive(Clone, Copy)]
enum CacheOutcome {
    Hit(Duration),
    Miss,
}

/// # Cached Query
///
/// Serves a fresh cache entry when there is one; otherwise fills the cache
/// from the upstream, sharing the fetch with concurrent identical requests.
async fn cached_query(State(state): State<GatewayState>, uri: Uri) -> Result<Response, QueryError> {
    // 1. Map the gateway path onto the upstream resource
    let path = uri.path().strip_prefix("/static").unwrap_or(uri.path());
    let class = EndpointClass::from_path(path)
        .ok_or_else(|| QueryError::UnknownRoute(uri.path().to_string()))?;
    let ttl = state.ttl.ttl_for(class);
    let fingerprint = Fingerprint::from_parts(path, uri.query());

    // 2. Fresh entry: no upstream traffic at all
    if let CacheLookup::Fresh(response, age) = state.cache.get(&fingerprint) {
        debug!(key = %fingerprint, ?age, "cache hit");
        return Ok(render(&response, CacheOutcome::Hit(age), ttl, state.expose_cache_headers));
    }

    // 3. Miss or stale: join or start the single fill for this key
    let target = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let upstream = Arc::clone(&state.upstream);
    let response = state
        .cache
        .fetch_or_join(fingerprint, ttl, move || async move { upstream.fetch(&target).await })
        .await?;

    Ok(render(&response, CacheOutcome::Miss, ttl, state.expose_cache_headers))
}

fn render(cached: &CachedResponse, outcome: CacheOutcome, ttl: Duration, expose: bool) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body.clone()).into_response();
    let headers = response.headers_mut();
    for (name, value) in cached.headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    if expose {
        let age = match outcome {
            CacheOutcome::Hit(age) => age,
            CacheOutcome::Miss => Duration::ZERO,
        };
        let label = match outcome {
            CacheOutcome::Hit(_) => "HIT",
            CacheOutcome::Miss => "MISS",
        };
        let remaining = ttl.saturating_sub(age).as_secs();
        headers.insert(X_CACHE.clone(), HeaderValue::from_static(label));
        headers.insert(header::AGE, HeaderValue::from(age.as_secs()));
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", remaining)) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
    response
}

/// # Live Tunnel
///
/// Opens the upstream stream first, so a dead upstream is reported as a 502
/// instead of an accepted socket that closes immediately.
async fn live_tunnel(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Result<Response, QueryError> {
    let upstream = connect_upstream(&state.live_upstream_url, state.tunnel_connect_timeout).await?;
    let idle = state.tunnel_idle_timeout;

    Ok(ws.on_upgrade(move |socket| async move {
        let (client_tx, client_rx) = client_legs(socket);
        let (upstream_tx, upstream_rx) = upstream_legs(upstream);
        if let Err(e) = relay(client_tx, client_rx, upstream_tx, upstream_rx, idle).await {
            warn!(error = %e, "live tunnel ended with an error");
        }
    }))
}
