// ============================================================================
// rdkafka Transport
// ============================================================================
//
// `BrokerTransport` over librdkafka:
// - FutureProducer for sends (acks/idempotence/compression from config)
// - StreamConsumer joined to the configured consumer group
// - Short-lived AdminClient per admin call (topic creation, metadata)
//
// librdkafka replaces the whole subscription on every `subscribe`, so the
// transport keeps its own topic lists and resubscribes with all of them.
//
// `auto.offset.reset` is a per-client setting. Topics subscribed with
// fromBeginning while the client-wide reset is `latest` go to a second
// consumer in the same group created with `earliest`; `recv` polls both.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use budget_events_config::KafkaConfig;
use budget_events_error::{GatewayError, GatewayResult};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{info, warn};

use super::config::create_client_config;
use super::transport::{BrokerTransport, ClusterMetadata, TopicCreation};
use super::types::{DeliveryReceipt, HeaderMap, InboundRecord, OutboundRecord, TopicSpec};

const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a consumer without a committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    fn as_str(self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }

    fn for_subscription(from_beginning: bool, default: OffsetReset) -> OffsetReset {
        if from_beginning {
            OffsetReset::Earliest
        } else {
            default
        }
    }
}

/// Subscribed topics grouped by the offset reset of the consumer that
/// reads them. A topic keeps the route of its first subscription.
#[derive(Debug, Default)]
struct TopicRouting {
    latest: Vec<String>,
    earliest: Vec<String>,
}

impl TopicRouting {
    fn lookup(&self, topic: &str) -> Option<OffsetReset> {
        if self.earliest.iter().any(|t| t == topic) {
            Some(OffsetReset::Earliest)
        } else if self.latest.iter().any(|t| t == topic) {
            Some(OffsetReset::Latest)
        } else {
            None
        }
    }

    fn insert(&mut self, topic: &str, reset: OffsetReset) {
        if self.lookup(topic).is_some() {
            return;
        }
        self.list_mut(reset).push(topic.to_string());
    }

    fn remove(&mut self, topic: &str) {
        self.latest.retain(|t| t != topic);
        self.earliest.retain(|t| t != topic);
    }

    fn topics(&self, reset: OffsetReset) -> Vec<&str> {
        let list = match reset {
            OffsetReset::Earliest => &self.earliest,
            OffsetReset::Latest => &self.latest,
        };
        list.iter().map(String::as_str).collect()
    }

    fn clear(&mut self) {
        self.latest.clear();
        self.earliest.clear();
    }

    fn list_mut(&mut self, reset: OffsetReset) -> &mut Vec<String> {
        match reset {
            OffsetReset::Earliest => &mut self.earliest,
            OffsetReset::Latest => &mut self.latest,
        }
    }
}

pub struct RdKafkaTransport {
    config: KafkaConfig,
    producer: RwLock<Option<Arc<FutureProducer>>>,
    consumer: RwLock<Option<Arc<StreamConsumer>>>,
    earliest_consumer: RwLock<Option<Arc<StreamConsumer>>>,
    routing: Mutex<TopicRouting>,
    consumers_changed: Notify,
}

impl RdKafkaTransport {
    /// Clients are created lazily on connect, so this never touches the
    /// network.
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            producer: RwLock::new(None),
            consumer: RwLock::new(None),
            earliest_consumer: RwLock::new(None),
            routing: Mutex::new(TopicRouting::default()),
            consumers_changed: Notify::new(),
        }
    }

    fn default_reset(&self) -> OffsetReset {
        if self.config.consumer_from_beginning {
            OffsetReset::Earliest
        } else {
            OffsetReset::Latest
        }
    }

    fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.config.admin_timeout_ms)
    }

    fn admin_client(&self) -> GatewayResult<AdminClient<DefaultClientContext>> {
        create_client_config(&self.config)?
            .create()
            .map_err(GatewayError::transport)
    }

    async fn producer(&self) -> GatewayResult<Arc<FutureProducer>> {
        self.producer.read().await.clone().ok_or(GatewayError::NotConnected)
    }

    async fn consumer(&self) -> GatewayResult<Arc<StreamConsumer>> {
        self.consumer.read().await.clone().ok_or(GatewayError::NotConnected)
    }

    fn build_consumer(&self, reset: OffsetReset) -> GatewayResult<StreamConsumer> {
        create_client_config(&self.config)?
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", reset.as_str())
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .create()
            .map_err(GatewayError::transport)
    }

    /// The consumer reading topics with `reset`, creating the earliest-reset
    /// consumer on first use.
    async fn consumer_for(&self, reset: OffsetReset) -> GatewayResult<Arc<StreamConsumer>> {
        let primary = self.consumer().await?;
        if reset == self.default_reset() {
            return Ok(primary);
        }

        let mut slot = self.earliest_consumer.write().await;
        if let Some(consumer) = slot.as_ref() {
            return Ok(consumer.clone());
        }

        let consumer = Arc::new(self.build_consumer(reset)?);
        info!(group_id = %self.config.group_id, "Kafka earliest-offset consumer connected");
        *slot = Some(consumer.clone());
        self.consumers_changed.notify_one();
        Ok(consumer)
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> InboundRecord {
    let headers: HeaderMap = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    InboundRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

#[async_trait]
impl BrokerTransport for RdKafkaTransport {
    async fn create_topics(&self, topics: &[TopicSpec]) -> GatewayResult<Vec<(String, TopicCreation)>> {
        let admin = self.admin_client()?;
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| NewTopic::new(&t.name, t.partitions, TopicReplication::Fixed(t.replication_factor)))
            .collect();
        let options = AdminOptions::new().operation_timeout(Some(self.admin_timeout()));

        let results = admin
            .create_topics(new_topics.iter(), &options)
            .await
            .map_err(GatewayError::transport)?;

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, TopicCreation::Created),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => (name, TopicCreation::AlreadyExists),
                Err((name, code)) => (name, TopicCreation::Failed(code.to_string())),
            })
            .collect())
    }

    async fn fetch_metadata(&self) -> GatewayResult<ClusterMetadata> {
        let admin = self.admin_client()?;
        let timeout = self.admin_timeout();

        // fetch_metadata blocks the calling thread
        tokio::task::spawn_blocking(move || {
            admin
                .inner()
                .fetch_metadata(None, timeout)
                .map(|metadata| ClusterMetadata {
                    broker_count: metadata.brokers().len(),
                    topic_count: metadata.topics().len(),
                })
                .map_err(GatewayError::transport)
        })
        .await
        .map_err(GatewayError::transport)?
    }

    async fn connect_producer(&self) -> GatewayResult<()> {
        let mut slot = self.producer.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let mut client_config = create_client_config(&self.config)?;
        let producer: FutureProducer = client_config
            .set("acks", &self.config.producer_acks)
            .set(
                "enable.idempotence",
                if self.config.producer_enable_idempotence {
                    "true"
                } else {
                    "false"
                },
            )
            .set("compression.type", &self.config.producer_compression)
            .set("linger.ms", self.config.producer_linger_ms.to_string())
            .set(
                "delivery.timeout.ms",
                self.config.producer_delivery_timeout_ms.to_string(),
            )
            .create()
            .map_err(GatewayError::transport)?;
        let producer = Arc::new(producer);

        // Creating the client does not contact the cluster; a metadata round
        // trip does.
        let handle = producer.clone();
        let timeout = self.admin_timeout();
        tokio::task::spawn_blocking(move || handle.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(GatewayError::transport)?
            .map_err(GatewayError::transport)?;

        info!(brokers = %self.config.bootstrap_servers(), "Kafka producer connected");
        *slot = Some(producer);
        Ok(())
    }

    async fn connect_consumer(&self) -> GatewayResult<()> {
        let mut slot = self.consumer.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let consumer = self.build_consumer(self.default_reset())?;

        info!(group_id = %self.config.group_id, "Kafka consumer connected");
        *slot = Some(Arc::new(consumer));
        Ok(())
    }

    async fn disconnect_producer(&self) -> GatewayResult<()> {
        let Some(producer) = self.producer.write().await.take() else {
            return Ok(());
        };

        let timeout = Timeout::After(self.admin_timeout());
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(GatewayError::transport)?
            .map_err(GatewayError::transport)
    }

    async fn disconnect_consumer(&self) -> GatewayResult<()> {
        self.routing.lock().await.clear();
        if let Some(consumer) = self.earliest_consumer.write().await.take() {
            consumer.unsubscribe();
        }
        if let Some(consumer) = self.consumer.write().await.take() {
            consumer.unsubscribe();
        }
        self.consumers_changed.notify_one();
        Ok(())
    }

    async fn send(&self, record: OutboundRecord) -> GatewayResult<DeliveryReceipt> {
        let producer = self.producer().await?;

        let headers = record.headers.iter().fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        });

        let mut future_record: FutureRecord<'_, str, Vec<u8>> = FutureRecord::to(&record.topic)
            .payload(&record.value)
            .headers(headers);
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_str());
        }

        match producer.send(future_record, Timeout::After(SEND_QUEUE_TIMEOUT)).await {
            Ok((partition, offset)) => Ok(DeliveryReceipt { partition, offset }),
            Err((e, _)) => Err(GatewayError::transport(e)),
        }
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> GatewayResult<()> {
        let mut routing = self.routing.lock().await;
        let existing = routing.lookup(topic);
        let reset = existing.unwrap_or(OffsetReset::for_subscription(from_beginning, self.default_reset()));
        let consumer = self.consumer_for(reset).await?;

        routing.insert(topic, reset);
        let names = routing.topics(reset);
        if let Err(e) = consumer.subscribe(&names) {
            if existing.is_none() {
                routing.remove(topic);
            }
            warn!(error = %e, topic = %topic, "Kafka subscribe rejected");
            return Err(GatewayError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }

        info!(topic = %topic, offset_reset = reset.as_str(), "Subscribed to Kafka topic");
        Ok(())
    }

    async fn recv(&self) -> GatewayResult<InboundRecord> {
        loop {
            let primary = self.consumer().await?;
            let earliest = self.earliest_consumer.read().await.clone();

            // None: the consumer set changed while waiting, poll again
            let received = match earliest {
                Some(earliest) => tokio::select! {
                    message = primary.recv() => Some(message.map(|m| to_record(&m))),
                    message = earliest.recv() => Some(message.map(|m| to_record(&m))),
                    _ = self.consumers_changed.notified() => None,
                },
                None => tokio::select! {
                    message = primary.recv() => Some(message.map(|m| to_record(&m))),
                    _ = self.consumers_changed.notified() => None,
                },
            };

            if let Some(record) = received {
                return record.map_err(GatewayError::transport);
            }
        }
    }
}
