use async_trait::async_trait;
use budget_events_error::GatewayResult;

use super::types::{DeliveryReceipt, InboundRecord, OutboundRecord, TopicSpec};

/// Per-topic result of a create-topics request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    AlreadyExists,
    Failed(String),
}

/// Broker topology as seen by a short-lived admin connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub broker_count: usize,
    pub topic_count: usize,
}

/// The producer / consumer / admin client triple behind the gateway.
///
/// One instance lives for the whole process. Admin operations open and close
/// their own connection and must not depend on producer or consumer state.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Create topics, waiting for partition leaders. Returns one outcome per
    /// requested topic; an error means the admin request itself failed.
    async fn create_topics(&self, topics: &[TopicSpec]) -> GatewayResult<Vec<(String, TopicCreation)>>;

    /// Open an admin connection and fetch cluster metadata.
    async fn fetch_metadata(&self) -> GatewayResult<ClusterMetadata>;

    async fn connect_producer(&self) -> GatewayResult<()>;

    async fn connect_consumer(&self) -> GatewayResult<()>;

    async fn disconnect_producer(&self) -> GatewayResult<()>;

    async fn disconnect_consumer(&self) -> GatewayResult<()>;

    async fn send(&self, record: OutboundRecord) -> GatewayResult<DeliveryReceipt>;

    /// Add `topic` to the consumer's subscription set.
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> GatewayResult<()>;

    /// Wait for the next inbound message.
    async fn recv(&self) -> GatewayResult<InboundRecord>;
}
