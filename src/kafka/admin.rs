use std::sync::Arc;

use budget_events_config::{
    BUDGET_EVENTS_TOPIC, DEFAULT_DLQ_TOPIC, EXPENSE_EVENTS_TOPIC, TASK_EVENTS_TOPIC,
};
use budget_events_error::{GatewayError, GatewayResult};
use tracing::{debug, info};

use super::transport::{BrokerTransport, TopicCreation};
use super::types::TopicSpec;

/// Topics that must exist before traffic flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCatalog {
    topics: Vec<TopicSpec>,
}

impl Default for TopicCatalog {
    /// Budget, expense and task events plus the dead-letter topic.
    fn default() -> Self {
        Self::with_dead_letter_topic(DEFAULT_DLQ_TOPIC)
    }
}

impl TopicCatalog {
    pub fn new(topics: Vec<TopicSpec>) -> Self {
        Self { topics }
    }

    /// Default catalog with a custom dead-letter topic name
    pub fn with_dead_letter_topic(dead_letter_topic: &str) -> Self {
        Self::new(vec![
            TopicSpec::new(BUDGET_EVENTS_TOPIC, 3, 1),
            TopicSpec::new(EXPENSE_EVENTS_TOPIC, 3, 1),
            TopicSpec::new(TASK_EVENTS_TOPIC, 2, 1),
            TopicSpec::new(dead_letter_topic, 1, 1),
        ])
    }

    /// Add a topic, replacing any existing descriptor with the same name.
    pub fn with_topic(mut self, topic: TopicSpec) -> Self {
        self.topics.retain(|existing| existing.name != topic.name);
        self.topics.push(topic);
        self
    }

    pub fn topics(&self) -> &[TopicSpec] {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Makes sure catalog topics exist. Safe to run on every connect.
#[derive(Clone)]
pub struct TopicProvisioner {
    transport: Arc<dyn BrokerTransport>,
    default_catalog: TopicCatalog,
}

impl TopicProvisioner {
    pub fn new(transport: Arc<dyn BrokerTransport>, default_catalog: TopicCatalog) -> Self {
        Self {
            transport,
            default_catalog,
        }
    }

    pub fn default_catalog(&self) -> &TopicCatalog {
        &self.default_catalog
    }

    /// Create every topic in `catalog` (or the default catalog when `None`
    /// or empty). "Already exists" counts as success; any other per-topic
    /// failure fails the whole call.
    pub async fn ensure_topics(&self, catalog: Option<&TopicCatalog>) -> GatewayResult<()> {
        let catalog = match catalog {
            Some(catalog) if !catalog.is_empty() => catalog,
            _ => &self.default_catalog,
        };

        let outcomes = self.transport.create_topics(catalog.topics()).await?;

        let mut created = 0usize;
        for (topic, outcome) in outcomes {
            match outcome {
                TopicCreation::Created => created += 1,
                TopicCreation::AlreadyExists => {
                    debug!(topic = %topic, "Topic already exists");
                }
                TopicCreation::Failed(reason) => {
                    return Err(GatewayError::Provisioning { topic, reason });
                }
            }
        }

        info!(
            requested = catalog.topics().len(),
            created = created,
            "Kafka topics provisioned"
        );
        Ok(())
    }
}
