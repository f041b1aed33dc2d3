//! # Event Classifier
//!
//! Decides which channels an event is published on. The envelope is a JSON
//! object with an optional `kind`:
//!
//! - no `kind`, or `"raw"`: routed to `raw` with the original bytes;
//! - `"structured"`: the `data` object must be a valid transaction record. A
//!   valid record goes to `raw` (original bytes) and to `structured` (the
//!   normalized record); an invalid one goes nowhere;
//! - anything else is dropped.
//!
//! `classify` runs on the single delivery path, so it only reads the event
//! and allocates at most one normalized frame.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::event::{Channel, ChannelSet, Event};
use crate::error::ClassificationError;

/// One frame destined for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub channel: Channel,
    pub frame: Bytes,
}

/// Result of classifying one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    routes: Vec<Route>,
}

impl Classified {
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn channels(&self) -> ChannelSet {
        self.routes.iter().map(|r| r.channel).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn push(&mut self, channel: Channel, frame: Bytes) {
        self.routes.push(Route { channel, frame });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Ongoing,
    Error,
}

impl TransactionStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "success" => Some(TransactionStatus::Success),
            "ongoing" => Some(TransactionStatus::Ongoing),
            "error" => Some(TransactionStatus::Error),
            _ => None,
        }
    }
}

/// Normalized form of a transaction published on the `structured` channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl TransactionRecord {
    /// Validates a raw `data` object and builds its normalized form.
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, ClassificationError> {
        let id = match data.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
            _ => return Err(invalid("id must be a non-empty string or an integer")),
        };

        let timestamp = data
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("timestamp is missing"))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| invalid(format!("timestamp '{}' is not RFC 3339: {}", raw, e)))
            })?
            .with_timezone(&Utc);

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .and_then(TransactionStatus::parse)
            .ok_or_else(|| invalid("status must be one of success, ongoing, error"))?;

        let amount = match data.get("amount") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(_) => return Err(invalid("amount must be numeric")),
        };

        let currency = match data.get("currency") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.to_ascii_uppercase()),
            Some(_) => return Err(invalid("currency must be a string")),
        };

        Ok(Self {
            id,
            timestamp,
            status,
            amount,
            currency,
        })
    }
}

fn invalid(reason: impl Into<String>) -> ClassificationError {
    ClassificationError::InvalidRecord(reason.into())
}

/// # Classify
///
/// Pure routing of one event. An `Err` means the event reaches no channel;
/// the caller counts it and moves on.
pub fn classify(event: &Event) -> Result<Classified, ClassificationError> {
    let envelope: Value = serde_json::from_slice(&event.payload)
        .map_err(|e| ClassificationError::Malformed(e.to_string()))?;
    let envelope = envelope
        .as_object()
        .ok_or_else(|| ClassificationError::Malformed("top-level value is not an object".into()))?;

    let mut classified = Classified::default();
    match envelope.get("kind") {
        None => classified.push(Channel::Raw, event.payload.clone()),
        Some(Value::String(kind)) if kind == "raw" => {
            classified.push(Channel::Raw, event.payload.clone())
        }
        Some(Value::String(kind)) if kind == "structured" => {
            let data = envelope
                .get("data")
                .and_then(Value::as_object)
                .ok_or_else(|| invalid("data object is missing"))?;
            let record = TransactionRecord::from_json(data)?;
            let normalized = serde_json::to_vec(&record).map_err(|e| invalid(e.to_string()))?;

            classified.push(Channel::Raw, event.payload.clone());
            classified.push(Channel::Structured, Bytes::from(normalized));
        }
        Some(other) => return Err(ClassificationError::UnknownKind(other.to_string())),
    }

    Ok(classified)
}
