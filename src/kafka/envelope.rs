use std::sync::Arc;

use budget_events_config::DEFAULT_EVENT_SOURCE;
use budget_events_error::GatewayResult;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::{EventEnvelope, PublishMetadata, non_empty};

/// Source of event and correlation IDs
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random UUID v4 IDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Stamps caller payloads into [`EventEnvelope`]s.
///
/// Pure apart from the injected ID generator and clock, so output is fully
/// deterministic when both are fixed.
#[derive(Clone)]
pub struct EnvelopeBuilder {
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    default_source: String,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new(Arc::new(UuidGenerator), Arc::new(SystemClock))
    }
}

impl EnvelopeBuilder {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ids,
            clock,
            default_source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }

    /// Override the `source` used when metadata does not carry one.
    pub fn with_default_source(mut self, source: impl Into<String>) -> Self {
        self.default_source = source.into();
        self
    }

    /// Build an envelope.
    ///
    /// `eventId` and `correlationId` are taken from `metadata` when present
    /// and non-empty, otherwise generated (event ID first). Fails only when
    /// `event_type` is blank.
    pub fn build(
        &self,
        event_type: &str,
        payload: Value,
        metadata: &PublishMetadata,
    ) -> GatewayResult<EventEnvelope> {
        let event_id = non_empty(metadata.event_id.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| self.ids.generate());
        let correlation_id = non_empty(metadata.correlation_id.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| self.ids.generate());

        let envelope = EventEnvelope {
            event_id,
            event_type: event_type.to_string(),
            emitted_at: self.clock.now(),
            source: non_empty(metadata.source.as_deref())
                .unwrap_or(&self.default_source)
                .to_string(),
            correlation_id,
            payload,
            tags: metadata.tags.clone(),
        };

        envelope.validate()?;
        Ok(envelope)
    }
}
