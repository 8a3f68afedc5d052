use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, TextEncoder, opts, register_histogram, register_int_counter,
};

// ============================================================================
// Publish Metrics
// ============================================================================

/// Envelopes acknowledged by the broker
pub static KAFKA_PUBLISH_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_publish_success_total",
        "Total number of event envelopes acknowledged by the broker"
    ))
    .expect("Failed to register kafka_publish_success_total metric")
});

/// Envelopes the broker rejected (each one is routed to the DLQ)
pub static KAFKA_PUBLISH_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_publish_failure_total",
        "Total number of failed event publish attempts"
    ))
    .expect("Failed to register kafka_publish_failure_total metric")
});

pub static KAFKA_PUBLISH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "kafka_publish_latency_seconds",
        "Event publish latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register kafka_publish_latency_seconds metric")
});

pub static KAFKA_DLQ_SENT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_dlq_sent_total",
        "Total number of dead-letter records written"
    ))
    .expect("Failed to register kafka_dlq_sent_total metric")
});

pub static KAFKA_DLQ_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_dlq_failure_total",
        "Total number of dead-letter records that could not be written"
    ))
    .expect("Failed to register kafka_dlq_failure_total metric")
});

// ============================================================================
// Consume Metrics
// ============================================================================

pub static KAFKA_CONSUME_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_consume_success_total",
        "Total number of inbound messages dispatched"
    ))
    .expect("Failed to register kafka_consume_success_total metric")
});

pub static KAFKA_CONSUME_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_consume_failure_total",
        "Total number of consumer receive errors"
    ))
    .expect("Failed to register kafka_consume_failure_total metric")
});

pub static KAFKA_HANDLER_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_handler_failure_total",
        "Total number of handler invocations that returned an error"
    ))
    .expect("Failed to register kafka_handler_failure_total metric")
});

/// Inbound values that were not JSON and were wrapped as `{raw: ...}`
pub static KAFKA_DECODE_FALLBACK: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "kafka_decode_fallback_total",
        "Total number of inbound messages dispatched as raw text"
    ))
    .expect("Failed to register kafka_decode_fallback_total metric")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
