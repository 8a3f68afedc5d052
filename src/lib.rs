// ============================================================================
// Budget Events - event-messaging gateway
// ============================================================================
//
// Optional broker integration for the budget manager: the application must
// start and serve requests with no broker configured or reachable, so every
// gateway operation degrades to a no-op instead of failing.
//
// ============================================================================

pub mod kafka;
pub mod samples;

pub use budget_events_config::{Config, KafkaConfig};
pub use budget_events_error::{GatewayError, GatewayResult};
pub use kafka::{
    ConnectOutcome, ConnectionState, ConsumerOptions, EventEnvelope, EventGateway, HealthStatus,
    InboundEvent, PublishMetadata, TopicCatalog, TopicSpec,
};
