//! # Upstream Forwarder
//!
//! A thin `reqwest` wrapper that replays a query against the upstream query
//! service. No retries: a failed fill goes to every cache waiter and the next
//! request tries again.

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::cache::CachedResponse;
use crate::error::UpstreamError;

/// Upstream error bodies longer than this are cut before being reported.
const MAX_ERROR_BODY: usize = 2048;

/// Upstream response headers worth replaying to clients.
const KEPT_HEADERS: [reqwest::header::HeaderName; 3] = [CONTENT_TYPE, ETAG, LAST_MODIFIED];

/// HTTP client bound to the upstream query service.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// The underlying connection-pooling client.
    inner: reqwest::Client,
    /// The base URL to which all relative paths are joined. Always ends in `/`.
    base_url: Url,
    /// Whole-request timeout, reported back in `UpstreamError::Timeout`.
    timeout: Duration,
}

impl UpstreamClient {
    /// Creates a client for `base_url` with a bounded request timeout.
    ///
    /// # Errors
    /// Returns `UpstreamError::InvalidRequest` if `base_url` is not an absolute
    /// URL or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| UpstreamError::InvalidRequest(format!("base url '{}': {}", base_url, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves an upstream-relative path (with optional query) against the base.
    pub fn resolve(&self, path_and_query: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|e| UpstreamError::InvalidRequest(format!("path '{}': {}", path_and_query, e)))
    }

    /// # Fetch
    ///
    /// GETs `path_and_query` from the upstream and captures status, the
    /// replayable headers and the full body.
    ///
    /// # Errors
    /// * `NotFound` for a 404, `Status` for any other non-2xx answer.
    /// * `Unreachable` when no connection could be made.
    /// * `Timeout` when the upstream did not answer in time.
    pub async fn fetch(&self, path_and_query: &str) -> Result<CachedResponse, UpstreamError> {
        // 1. Construct the full absolute URL
        let url = self.resolve(path_and_query)?;
        debug!(%url, "forwarding query upstream");

        // 2. Execute the request
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        let headers = replayable_headers(response.headers());

        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound);
        }

        // 3. Read the whole body; upstream answers are small JSON documents
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Body(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(CachedResponse::new(status.as_u16(), headers, body))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else if e.is_builder() {
            UpstreamError::InvalidRequest(e.to_string())
        } else {
            UpstreamError::Unreachable(e.to_string())
        }
    }
}

fn replayable_headers(source: &HeaderMap) -> HeaderMap {
    let mut kept = HeaderMap::new();
    for name in KEPT_HEADERS.iter() {
        if let Some(value) = source.get(name) {
            kept.insert(name.clone(), value.clone());
        }
    }
    kept
}

fn truncate_body(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, SET_COOKIE};

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let client = UpstreamClient::new("http://static-data:8081/api", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://static-data:8081/api/");
        assert_eq!(
            client.resolve("/transactions/dates?from=2024-01-01").unwrap().as_str(),
            "http://static-data:8081/api/transactions/dates?from=2024-01-01"
        );
    }

    #[test]
    fn relative_base_url_is_rejected() {
        assert!(matches!(
            UpstreamClient::new("/transactions", Duration::from_secs(1)),
            Err(UpstreamError::InvalidRequest(_))
        ));
    }

    #[test]
    fn only_replayable_headers_are_kept() {
        let mut source = HeaderMap::new();
        source.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        source.insert(SET_COOKIE, HeaderValue::from_static("session=1"));

        let kept = replayable_headers(&source);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = Bytes::from("é".repeat(MAX_ERROR_BODY));
        let text = truncate_body(&body);
        assert!(text.len() <= MAX_ERROR_BODY + '…'.len_utf8());
        assert!(text.ends_with('…'));
        assert_eq!(truncate_body(&Bytes::from_static(b"bad filter")), "bad filter");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UpstreamClient::new(&format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        let err = client.fetch("transactions").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unreachable(_)), "{:?}", err);
        assert!(err.is_retryable());
    }
}
