use std::collections::HashMap;

use budget_events_error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message headers: string keys, opaque byte values
pub type HeaderMap = HashMap<String, Vec<u8>>;

/// Canonical event envelope placed around every published payload.
///
/// Serialized as a camelCase JSON object; this is the value of every message
/// the gateway publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Globally unique event ID (UUID v4 unless supplied)
    pub event_id: String,

    /// Caller-supplied classification, e.g. "budget.created"
    pub event_type: String,

    pub emitted_at: DateTime<Utc>,

    /// Originating component
    pub source: String,

    /// Threads related events together
    pub correlation_id: String,

    /// Opaque to the gateway; `null` is allowed but the field is always present
    pub payload: Value,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl EventEnvelope {
    /// Check the identity invariants before the envelope leaves the process.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.event_type.trim().is_empty() {
            return Err(GatewayError::InvalidEnvelope("eventType is required".into()));
        }
        if self.event_id.is_empty() {
            return Err(GatewayError::InvalidEnvelope("eventId is empty".into()));
        }
        if self.correlation_id.is_empty() {
            return Err(GatewayError::InvalidEnvelope("correlationId is empty".into()));
        }
        Ok(())
    }
}

/// Optional per-publish settings.
///
/// Empty strings are treated the same as absent values.
#[derive(Debug, Clone, Default)]
pub struct PublishMetadata {
    /// Message key; defaults to the envelope's `eventId`
    pub key: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub event_id: Option<String>,
    pub tags: Vec<String>,
    pub headers: HeaderMap,
}

impl PublishMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub(crate) fn key(&self) -> Option<&str> {
        non_empty(self.key.as_deref())
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Payload written to the dead-letter topic when a publish fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub error: String,
    pub envelope: EventEnvelope,
}

/// Topic descriptor used for provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

/// A message about to be handed to the broker client
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub headers: HeaderMap,
}

/// Where the broker stored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// A message received from the broker, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: HeaderMap,
}

/// What a handler receives: the decoded message plus its delivery context.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub topic: String,
    pub partition: i32,
    /// Decoded JSON value, or `{"raw": "<original text>"}` when the value
    /// was not valid JSON
    pub message: Value,
    pub headers: HeaderMap,
}

impl InboundEvent {
    /// The `eventType` field of the decoded message, if any.
    pub fn event_type(&self) -> Option<&str> {
        self.message.get("eventType").and_then(Value::as_str)
    }

    /// The decoded message as a typed envelope. Fails for raw fallbacks and
    /// foreign payloads.
    pub fn envelope(&self) -> GatewayResult<EventEnvelope> {
        Ok(serde_json::from_value(self.message.clone())?)
    }
}
