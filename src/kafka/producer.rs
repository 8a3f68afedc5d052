use std::sync::Arc;

use budget_events_error::GatewayResult;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::envelope::EnvelopeBuilder;
use super::metrics;
use super::transport::BrokerTransport;
use super::types::{
    DeadLetterRecord, DeliveryReceipt, EventEnvelope, HeaderMap, OutboundRecord, PublishMetadata,
};

/// Publishes envelopes and falls back to the dead-letter topic on failure.
///
/// Nothing here returns an error to the caller: a messaging outage must never
/// fail the caller's primary operation.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn BrokerTransport>,
    builder: EnvelopeBuilder,
    dead_letter_topic: String,
}

impl EventPublisher {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        builder: EnvelopeBuilder,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            builder,
            dead_letter_topic: dead_letter_topic.into(),
        }
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    /// Build, serialize and send an envelope.
    ///
    /// # Returns
    /// * `Some(envelope)` - acknowledged by the broker
    /// * `None` - the envelope was invalid or the send failed; failed sends
    ///   are re-routed to the dead-letter topic on a best-effort basis
    pub async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: Value,
        metadata: &PublishMetadata,
    ) -> Option<EventEnvelope> {
        let envelope = match self.builder.build(event_type, payload, metadata) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, topic = %topic, "Refusing to publish invalid event");
                return None;
            }
        };

        let start = std::time::Instant::now();

        match self.send_envelope(topic, &envelope, metadata).await {
            Ok(receipt) => {
                let latency = start.elapsed();
                metrics::KAFKA_PUBLISH_SUCCESS.inc();
                metrics::KAFKA_PUBLISH_LATENCY.observe(latency.as_secs_f64());

                debug!(
                    topic = %topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    latency_ms = latency.as_millis(),
                    "Event published"
                );
                Some(envelope)
            }
            Err(e) => {
                metrics::KAFKA_PUBLISH_FAILURE.inc();
                warn!(
                    error = %e,
                    topic = %topic,
                    event_id = %envelope.event_id,
                    "Error sending event to Kafka"
                );
                self.publish_to_dlq(topic, &envelope, &e.to_string()).await;
                None
            }
        }
    }

    async fn send_envelope(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
        metadata: &PublishMetadata,
    ) -> GatewayResult<DeliveryReceipt> {
        let value = serde_json::to_vec(envelope)?;
        let key = metadata.key().unwrap_or(&envelope.event_id).to_string();

        self.transport
            .send(OutboundRecord {
                topic: topic.to_string(),
                key: Some(key),
                value,
                headers: metadata.headers.clone(),
            })
            .await
    }

    /// Write a dead-letter record for `envelope`. Failures are logged only.
    async fn publish_to_dlq(&self, source_topic: &str, envelope: &EventEnvelope, reason: &str) {
        let record = DeadLetterRecord {
            source_topic: source_topic.to_string(),
            error: reason.to_string(),
            envelope: envelope.clone(),
        };

        let value = match serde_json::to_vec(&record) {
            Ok(value) => value,
            Err(e) => {
                metrics::KAFKA_DLQ_FAILURE.inc();
                error!(error = %e, event_id = %envelope.event_id, "Failed to serialize DLQ record");
                return;
            }
        };

        let result = self
            .transport
            .send(OutboundRecord {
                topic: self.dead_letter_topic.clone(),
                key: None,
                value,
                headers: HeaderMap::new(),
            })
            .await;

        match result {
            Ok(_) => {
                metrics::KAFKA_DLQ_SENT.inc();
                info!(
                    source_topic = %source_topic,
                    dlq_topic = %self.dead_letter_topic,
                    event_id = %envelope.event_id,
                    "Event routed to dead-letter topic"
                );
            }
            Err(e) => {
                metrics::KAFKA_DLQ_FAILURE.inc();
                error!(
                    error = %e,
                    source_topic = %source_topic,
                    dlq_topic = %self.dead_letter_topic,
                    event_id = %envelope.event_id,
                    "Failed to write dead-letter record"
                );
            }
        }
    }

    /// Send a value without an envelope. Strings go out verbatim, anything
    /// else as JSON. Returns whether the broker acknowledged it.
    pub async fn send_message(&self, topic: &str, message: &Value) -> bool {
        let value = match message {
            Value::String(text) => text.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        };

        let result = self
            .transport
            .send(OutboundRecord {
                topic: topic.to_string(),
                key: None,
                value,
                headers: HeaderMap::new(),
            })
            .await;

        match result {
            Ok(receipt) => {
                debug!(topic = %topic, offset = receipt.offset, "Sent raw message to Kafka");
                true
            }
            Err(e) => {
                warn!(error = %e, topic = %topic, "Error sending message to Kafka");
                false
            }
        }
    }
}
