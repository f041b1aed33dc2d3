//! # Ingestion Pipeline
//!
//! The one task that reads the log. Events are handled strictly one after
//! another (read, classify, broadcast, commit), which keeps source order all
//! the way into every subscriber queue. Nothing in the loop waits on a
//! subscriber: the broadcaster only enqueues.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::core::broadcaster::Broadcaster;
use crate::core::classifier::classify;
use crate::core::stats::PipelineStats;
use crate::error::SourceError;
use crate::ingestors::source::{EventSourceClient, LogConnector};

pub struct Pipeline<C: LogConnector> {
    source: EventSourceClient<C>,
    broadcaster: Broadcaster,
    stats: Arc<PipelineStats>,
}

impl<C: LogConnector> Pipeline<C> {
    pub fn new(source: EventSourceClient<C>, broadcaster: Broadcaster, stats: Arc<PipelineStats>) -> Self {
        Self {
            source,
            broadcaster,
            stats,
        }
    }

    /// # Run
    ///
    /// Consumes until `shutdown` fires (returns `Ok`) or the source fails
    /// permanently (returns that error). Per-event problems are counted and
    /// skipped.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SourceError> {
        info!(topic = %self.source.settings().topic, "ingestion pipeline started");

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                next = self.source.next_event() => match next {
                    Ok(event) => event,
                    Err(e) => break Err(e),
                },
            };

            self.stats.record_received();
            match classify(&event) {
                Ok(classified) => {
                    self.stats.record_routed();
                    let report = self.broadcaster.broadcast(&classified);
                    trace!(
                        position = %event.position,
                        delivered = report.delivered,
                        evicted = report.evicted,
                        "event broadcast"
                    );
                }
                Err(reason) => {
                    self.stats.record_dropped(&reason);
                    warn!(position = %event.position, %reason, "event dropped");
                }
            }

            if let Err(e) = self.source.commit(&event.position) {
                break Err(e);
            }
        };

        self.source.close().await;
        match &outcome {
            Ok(()) => info!("ingestion pipeline stopped"),
            Err(e) => warn!(error = %e, "ingestion pipeline aborted"),
        }
        outcome
    }
}
