// Kafka event gateway
//
// Connects the process to the broker, provisions the topic catalog, wraps
// payloads in event envelopes (with dead-letter fallback on failed sends) and
// dispatches inbound messages to registered handlers.

pub mod admin;
#[cfg(feature = "kafka")]
pub mod client;
#[cfg(feature = "kafka")]
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod gateway;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod producer;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use budget_events_config::{
    BUDGET_EVENTS_TOPIC, DEFAULT_DLQ_TOPIC, EXPENSE_EVENTS_TOPIC, HandlerFailurePolicy,
    TASK_EVENTS_TOPIC,
};
pub use admin::{TopicCatalog, TopicProvisioner};
#[cfg(feature = "kafka")]
pub use client::RdKafkaTransport;
pub use consumer::{ConsumerOptions, ConsumerRegistry, EventTypeFilter};
pub use envelope::{Clock, EnvelopeBuilder, IdGenerator};
pub use gateway::{ConnectOutcome, ConnectionState, EventGateway};
pub use health::{HealthMonitor, HealthStatus};
pub use memory::InMemoryBroker;
pub use producer::EventPublisher;
pub use transport::{BrokerTransport, ClusterMetadata, TopicCreation};
pub use types::{
    DeadLetterRecord, EventEnvelope, HeaderMap, InboundEvent, PublishMetadata, TopicSpec,
};
