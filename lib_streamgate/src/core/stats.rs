//! # Pipeline Statistics
//!
//! Lock-free counters updated from the consumer task, the broadcaster and the
//! subscriber sessions. Every update uses `Ordering::Relaxed`: the counters are
//! only ever read as an eventually consistent report, never used to order
//! other memory operations.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ClassificationError;

#[derive(Debug, Default)]
pub struct PipelineStats {
    events_received: AtomicU64,
    events_routed: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_invalid: AtomicU64,
    dropped_unknown_kind: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    disconnects: AtomicU64,
    source_reconnects: AtomicU64,
}

/// Point-in-time copy of the counters, served on `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub events_routed: u64,
    pub dropped_malformed: u64,
    pub dropped_invalid: u64,
    pub dropped_unknown_kind: u64,
    pub deliveries: u64,
    /// Subscribers dropped by the broadcaster (queue full or already gone).
    pub evictions: u64,
    /// Subscribers torn down by their own session: client close, write
    /// failure or timeout.
    pub disconnects: u64,
    pub source_reconnects: u64,
}

impl StatsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_malformed + self.dropped_invalid + self.dropped_unknown_kind
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: &ClassificationError) {
        let counter = match reason {
            ClassificationError::Malformed(_) => &self.dropped_malformed,
            ClassificationError::InvalidRecord(_) => &self.dropped_invalid,
            ClassificationError::UnknownKind(_) => &self.dropped_unknown_kind,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fanout(&self, delivered: usize, evicted: usize) {
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.source_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_unknown_kind: self.dropped_unknown_kind.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            source_reconnects: self.source_reconnects.load(Ordering::Relaxed),
        }
    }
}
