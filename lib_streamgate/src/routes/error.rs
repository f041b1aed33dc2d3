//! # Query Errors
//!
//! Maps cache, upstream and tunnel failures onto HTTP responses with a JSON
//! body of the form `{ "error", "message", "retryable" }`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::{CacheError, TunnelError, UpstreamError};

/// Seconds a client is told to wait before retrying an unavailable upstream.
const RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error("no such resource: {0}")]
    UnknownRoute(String),
}

impl QueryError {
    /// Response status and the stable `error` kind string.
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            QueryError::Cache(CacheError::Cancelled) => {
                (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
            }
            QueryError::Cache(CacheError::Upstream(e)) => match e {
                UpstreamError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                UpstreamError::Status { status, .. } if (400..500).contains(status) => (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                    "upstream_rejected",
                ),
                UpstreamError::Status { .. } | UpstreamError::Body(_) => {
                    (StatusCode::BAD_GATEWAY, "upstream_error")
                }
                UpstreamError::Unreachable(_) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"),
                UpstreamError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
                UpstreamError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            },
            QueryError::Tunnel(_) => (StatusCode::BAD_GATEWAY, "live_upstream_unavailable"),
            QueryError::UnknownRoute(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            QueryError::Cache(CacheError::Cancelled) => true,
            QueryError::Cache(CacheError::Upstream(e)) => e.is_retryable(),
            QueryError::Tunnel(_) => true,
            QueryError::UnknownRoute(_) => false,
        }
    }

    fn message(&self) -> String {
        match self {
            // Upstream 4xx bodies explain what was wrong with the request.
            QueryError::Cache(CacheError::Upstream(UpstreamError::Status { status, body }))
                if (400..500).contains(status) && !body.is_empty() =>
            {
                body.clone()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "query failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "query rejected");
        }

        let body = Json(json!({
            "error": kind,
            "message": self.message(),
            "retryable": self.retryable(),
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}
