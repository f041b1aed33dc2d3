//! # Event Source Client
//!
//! A long-lived consumer of one topic that survives broker hiccups. The log
//! itself sits behind `LogConnector` (open a session) and `LogSession` (read,
//! commit, close), so the retry and resume rules here do not depend on Kafka.
//!
//! - Transient failures, at connect time or mid-stream, are retried forever
//!   with capped exponential backoff.
//! - A permanent failure is logged once, the session is closed, and every
//!   later call returns it.
//! - Reconnects resume from the committed positions, so events that were read
//!   but not committed before a drop are delivered again.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::event::{Event, Position};
use crate::core::stats::PipelineStats;
use crate::error::SourceError;
use crate::ingestors::backoff::Backoff;

/// Where to consume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

/// Last committed offset per (topic, partition).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedPositions(HashMap<(String, i32), i64>);

impl CommittedPositions {
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.0.get(&(topic.to_string(), partition)).copied()
    }

    /// Records `position`; offsets never move backwards.
    pub fn record(&mut self, position: &Position) {
        let slot = self
            .0
            .entry((position.topic.clone(), position.partition))
            .or_insert(position.offset);
        *slot = (*slot).max(position.offset);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One open session against the log.
#[async_trait]
pub trait LogSession: Send {
    /// Waits for the next event.
    async fn recv(&mut self) -> Result<Event, SourceError>;

    /// Marks `position` as handed off. Must not block.
    fn commit(&mut self, position: &Position) -> Result<(), SourceError>;

    /// Releases the session.
    async fn close(&mut self);
}

/// Opens sessions against the log.
#[async_trait]
pub trait LogConnector: Send + Sync {
    type Session: LogSession;

    /// Opens a session positioned just after `committed`.
    async fn connect(
        &self,
        settings: &SourceSettings,
        committed: &CommittedPositions,
    ) -> Result<Self::Session, SourceError>;
}

pub struct EventSourceClient<C: LogConnector> {
    connector: C,
    settings: SourceSettings,
    backoff: Backoff,
    stats: Arc<PipelineStats>,
    session: Option<C::Session>,
    committed: CommittedPositions,
    failure: Option<SourceError>,
}

impl<C: LogConnector> EventSourceClient<C> {
    /// # Connect
    ///
    /// Opens the first session, retrying transient failures. Returns an error
    /// only for a permanent failure.
    pub async fn connect(
        connector: C,
        settings: SourceSettings,
        backoff: Backoff,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, SourceError> {
        let mut client = Self {
            connector,
            settings,
            backoff,
            stats,
            session: None,
            committed: CommittedPositions::default(),
            failure: None,
        };
        client.establish().await?;
        Ok(client)
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    pub fn committed(&self) -> &CommittedPositions {
        &self.committed
    }

    async fn establish(&mut self) -> Result<(), SourceError> {
        loop {
            match self.connector.connect(&self.settings, &self.committed).await {
                Ok(session) => {
                    info!(
                        brokers = %self.settings.brokers,
                        topic = %self.settings.topic,
                        group = %self.settings.group_id,
                        attempts = self.backoff.attempt() + 1,
                        "event source connected"
                    );
                    self.backoff.reset();
                    self.session = Some(session);
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "event source connect failed");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    async fn fail(&mut self, e: SourceError) -> SourceError {
        error!(error = %e, topic = %self.settings.topic, "event source terminated");
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.failure = Some(e.clone());
        e
    }

    /// # Next Event
    ///
    /// Reads the next event in log order, reconnecting as needed.
    pub async fn next_event(&mut self) -> Result<Event, SourceError> {
        loop {
            if let Some(e) = &self.failure {
                return Err(e.clone());
            }

            let Some(session) = self.session.as_mut() else {
                self.stats.record_reconnect();
                self.establish().await?;
                continue;
            };

            match session.recv().await {
                Ok(event) => return Ok(event),
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "event source dropped, reconnecting");
                    if let Some(mut dropped) = self.session.take() {
                        dropped.close().await;
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// # Commit
    ///
    /// Records that `position` was handed to the broadcaster. A transient
    /// commit failure is only logged: the event may be redelivered later.
    pub fn commit(&mut self, position: &Position) -> Result<(), SourceError> {
        self.committed.record(position);
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        match session.commit(position) {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                warn!(error = %e, position = %position, "offset commit failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the session. Later calls to `next_event` fail.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            info!(topic = %self.settings.topic, "event source closed");
        }
        self.failure
            .get_or_insert_with(|| SourceError::Permanent("event source closed".into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestors::testing::{MemoryLog, SessionScript};
    use std::time::Duration;

    fn settings() -> SourceSettings {
        SourceSettings {
            brokers: "memory".into(),
            topic: "data-lake".into(),
            group_id: "test".into(),
        }
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(1)).without_jitter()
    }

    async fn offsets(client: &mut EventSourceClient<MemoryLog>, n: usize, commit_upto: usize) -> Vec<i64> {
        let mut seen = Vec::new();
        for i in 0..n {
            let event = client.next_event().await.unwrap();
            if i < commit_upto {
                client.commit(&event.position).unwrap();
            }
            seen.push(event.position.offset);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connect_failures_are_retried() {
        let log = MemoryLog::new(3).fail_connects(vec![
            SourceError::Transient("broker down".into()),
            SourceError::Transient("broker down".into()),
        ]);
        let stats = Arc::new(PipelineStats::new());

        let mut client = EventSourceClient::connect(log.clone(), settings(), backoff(), stats)
            .await
            .unwrap();
        assert_eq!(log.connect_attempts(), 3);
        assert_eq!(client.next_event().await.unwrap().position.offset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_connect_failure_is_returned() {
        let log = MemoryLog::new(3).fail_connects(vec![SourceError::Permanent("unknown topic".into())]);
        let result = EventSourceClient::connect(log.clone(), settings(), backoff(), Arc::new(PipelineStats::new())).await;

        assert_eq!(result.err(), Some(SourceError::Permanent("unknown topic".into())));
        assert_eq!(log.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_drop_resumes_after_last_commit() {
        let log = MemoryLog::new(5).script(vec![SessionScript::DropAfter(3), SessionScript::Unlimited]);
        let stats = Arc::new(PipelineStats::new());
        let mut client = EventSourceClient::connect(log.clone(), settings(), backoff(), Arc::clone(&stats))
            .await
            .unwrap();

        // Offset 2 is read but not committed before the drop.
        let before = offsets(&mut client, 3, 2).await;
        assert_eq!(before, vec![0, 1, 2]);

        let after = offsets(&mut client, 3, 3).await;
        assert_eq!(after, vec![2, 3, 4]);
        assert_eq!(stats.snapshot().source_reconnects, 1);
        assert_eq!(client.committed().get("data-lake", 0), Some(4));
        assert_eq!(log.closed_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_stream_error_terminates_the_client() {
        let log = MemoryLog::new(5).script(vec![SessionScript::FailAfter(
            1,
            SourceError::Permanent("authorization revoked".into()),
        )]);
        let mut client = EventSourceClient::connect(log.clone(), settings(), backoff(), Arc::new(PipelineStats::new()))
            .await
            .unwrap();

        assert!(client.next_event().await.is_ok());
        let err = client.next_event().await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(client.next_event().await.unwrap_err(), err);
        assert_eq!(log.connect_attempts(), 1);
        assert_eq!(log.closed_sessions(), 1);
    }

    #[test]
    fn committed_positions_never_move_backwards() {
        let mut committed = CommittedPositions::default();
        committed.record(&Position::new("t", 0, 7));
        committed.record(&Position::new("t", 0, 3));
        committed.record(&Position::new("t", 1, 1));
        assert_eq!(committed.get("t", 0), Some(7));
        assert_eq!(committed.get("t", 1), Some(1));
        assert_eq!(committed.get("u", 0), None);
    }
}
