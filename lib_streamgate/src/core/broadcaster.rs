//! # Broadcaster
//!
//! Fans classified frames out to every subscriber of the matching channel.
//! Delivery never blocks the caller: a subscriber whose queue is full is
//! evicted on the spot instead of being waited for, so one slow client cannot
//! stall the pipeline or the other subscribers.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::classifier::Classified;
use crate::core::registry::{ConnectionRegistry, EvictReason};
use crate::core::stats::PipelineStats;
use crate::error::DeliveryError;

/// Outcome of one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<PipelineStats>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, stats: Arc<PipelineStats>) -> Self {
        Self { registry, stats }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// # Broadcast
    ///
    /// Enqueues each route's frame on every connection registered for its
    /// channel at the time of the call. Connections added during the call may
    /// or may not see the frame; connections removed during the call are
    /// skipped without affecting anyone else.
    pub fn broadcast(&self, classified: &Classified) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for route in classified.routes() {
            for subscriber in self.registry.snapshot(route.channel) {
                match subscriber.try_deliver(route.frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(DeliveryError::Capacity) => {
                        warn!(
                            connection = subscriber.id(),
                            channel = %route.channel,
                            "outbound queue full, evicting slow subscriber"
                        );
                        if self.registry.evict(&subscriber, EvictReason::QueueFull) {
                            report.evicted += 1;
                        }
                    }
                    Err(DeliveryError::Closed) => {
                        debug!(connection = subscriber.id(), "subscriber already gone");
                        if self.registry.evict(&subscriber, EvictReason::ReceiverGone) {
                            report.evicted += 1;
                        }
                    }
                }
            }
        }

        self.stats.record_fanout(report.delivered, report.evicted);
        report
    }
}
