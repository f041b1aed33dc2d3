//! # Kafka Log Binding
//!
//! `LogConnector` over rdkafka's `StreamConsumer`. Offsets are stored manually
//! (`enable.auto.offset.store = false`) and flushed by the auto-commit timer,
//! so the group only ever commits offsets the pipeline has handed off. After a
//! reconnect the group coordinator resumes every partition from those
//! committed offsets.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::event::{Event, Position};
use crate::error::SourceError;
use crate::ingestors::source::{CommittedPositions, LogConnector, LogSession, SourceSettings};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct KafkaConnector {
    /// Extra librdkafka properties applied after the defaults.
    overrides: Vec<(String, String)>,
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    fn client_config(&self, settings: &SourceSettings) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "10000");
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config
    }
}

pub struct KafkaSession {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

#[async_trait]
impl LogConnector for KafkaConnector {
    type Session = KafkaSession;

    async fn connect(
        &self,
        settings: &SourceSettings,
        committed: &CommittedPositions,
    ) -> Result<KafkaSession, SourceError> {
        let consumer: StreamConsumer = self
            .client_config(settings)
            .create()
            .map_err(classify_kafka_error)?;
        let consumer = Arc::new(consumer);

        let topic = settings.topic.clone();
        let probe = Arc::clone(&consumer);
        let probe_topic = topic.clone();
        tokio::task::spawn_blocking(move || check_topic(&probe, &probe_topic))
            .await
            .map_err(|e| SourceError::Transient(format!("metadata probe aborted: {}", e)))??;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(classify_kafka_error)?;

        info!(
            brokers = %settings.brokers,
            topic = %topic,
            group = %settings.group_id,
            resumed = !committed.is_empty(),
            "kafka consumer subscribed"
        );
        Ok(KafkaSession { consumer, topic })
    }
}

fn check_topic(consumer: &StreamConsumer, topic: &str) -> Result<(), SourceError> {
    let metadata = consumer
        .fetch_metadata(Some(topic), METADATA_TIMEOUT)
        .map_err(classify_kafka_error)?;

    let Some(found) = metadata.topics().iter().find(|t| t.name() == topic) else {
        return Err(SourceError::Permanent(format!("topic '{}' does not exist", topic)));
    };
    if let Some(err) = found.error() {
        let code = RDKafkaErrorCode::from(err);
        let message = format!("topic '{}' unavailable: {}", topic, code);
        return Err(if is_permanent_code(code) {
            SourceError::Permanent(message)
        } else {
            SourceError::Transient(message)
        });
    }
    if found.partitions().is_empty() {
        return Err(SourceError::Transient(format!("topic '{}' has no partitions yet", topic)));
    }
    Ok(())
}

#[async_trait]
impl LogSession for KafkaSession {
    async fn recv(&mut self) -> Result<Event, SourceError> {
        let message = self.consumer.recv().await.map_err(classify_kafka_error)?;
        let payload = message.payload().map(Bytes::copy_from_slice).unwrap_or_default();
        Ok(Event::new(
            payload,
            Position::new(message.topic(), message.partition(), message.offset()),
        ))
    }

    fn commit(&mut self, position: &Position) -> Result<(), SourceError> {
        self.consumer
            .store_offset(&position.topic, position.partition, position.offset + 1)
            .map_err(classify_kafka_error)
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "kafka consumer unsubscribed");
    }
}

fn is_permanent_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::InvalidGroupId
    )
}

/// Splits rdkafka failures into retryable and fatal ones.
pub fn classify_kafka_error(err: KafkaError) -> SourceError {
    match &err {
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => {
            SourceError::Permanent(err.to_string())
        }
        _ => match err.rdkafka_error_code() {
            Some(code) if is_permanent_code(code) => SourceError::Permanent(err.to_string()),
            _ => SourceError::Transient(err.to_string()),
        },
    }
}
