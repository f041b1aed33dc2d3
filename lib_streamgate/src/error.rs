//! # Error Taxonomy
//!
//! One enum per failure domain. Errors local to one subscriber or one event
//! (`ClassificationError`, `DeliveryError`) never halt the pipeline; only a
//! permanent `SourceError` does.

use std::time::Duration;
use thiserror::Error;

/// Failure of the event log connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Broker unreachable, session dropped, rebalance in progress. Retried with backoff.
    #[error("transient event source failure: {0}")]
    Transient(String),
    /// Unknown topic, rejected credentials, invalid configuration. Terminates the pipeline.
    #[error("permanent event source failure: {0}")]
    Permanent(String),
}

impl SourceError {
    /// Returns `true` when the client should reconnect rather than give up.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Why an event could not be routed to any channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// The payload is not a JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// The event declared itself `structured` but its record failed validation.
    #[error("structured record failed validation: {0}")]
    InvalidRecord(String),
    /// The envelope `kind` is not one we route.
    #[error("unknown event kind {0}")]
    UnknownKind(String),
}

/// Failure to hand a frame to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's session task is gone.
    #[error("subscriber transport closed")]
    Closed,
    /// The subscriber's outbound queue is full.
    #[error("subscriber outbound queue is full")]
    Capacity,
}

/// Failure reported by the upstream query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream resource not found")]
    NotFound,
    #[error("upstream answered with status {status}")]
    Status { status: u16, body: String },
    #[error("upstream response body could not be read: {0}")]
    Body(String),
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Unreachable(_) | UpstreamError::Timeout(_) | UpstreamError::Body(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            UpstreamError::NotFound | UpstreamError::InvalidRequest(_) => false,
        }
    }
}

/// Outcome delivered to every waiter of a failed cache fill.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("fetch cancelled by shutdown")]
    Cancelled,
}

/// Failure on either leg of a relayed WebSocket session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    #[error("could not open upstream stream {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("client leg failed: {0}")]
    Client(String),
    #[error("upstream leg failed: {0}")]
    Upstream(String),
}
