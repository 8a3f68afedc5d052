// ============================================================================
// In-Memory Broker
// ============================================================================
//
// A process-local `BrokerTransport` used by tests and local development.
//
// - Topics, subscriptions and sent records are kept in memory
// - Sends to a subscribed topic loop back into the inbound queue
// - Failures can be injected per operation (sends per topic)
// - Admin/producer/consumer calls are counted so callers can assert on them
// - Client connects and disconnects are logged in call order
//
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use budget_events_error::{GatewayError, GatewayResult};
use tokio::sync::{Mutex, mpsc};

use super::transport::{BrokerTransport, ClusterMetadata, TopicCreation};
use super::types::{DeliveryReceipt, HeaderMap, InboundRecord, OutboundRecord, TopicSpec};

#[derive(Default)]
struct Counters {
    create_topics: AtomicUsize,
    metadata: AtomicUsize,
    producer_connects: AtomicUsize,
    consumer_connects: AtomicUsize,
    subscribes: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    create_topics: AtomicBool,
    metadata: AtomicBool,
    connect: AtomicBool,
    subscribe: AtomicBool,
    send_topics: Mutex<HashSet<String>>,
}

/// A produced record and the offset it was written at
struct SentRecord {
    offset: i64,
    record: OutboundRecord,
}

struct Inner {
    broker_count: usize,
    topics: Mutex<HashMap<String, TopicSpec>>,
    subscriptions: Mutex<Vec<(String, bool)>>,
    sent: Mutex<Vec<SentRecord>>,
    lifecycle: Mutex<Vec<&'static str>>,
    offsets: Mutex<HashMap<String, i64>>,
    inbound_tx: mpsc::UnboundedSender<InboundRecord>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundRecord>>,
    counters: Counters,
    faults: Faults,
}

/// Cloneable handle; all clones share one broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryBroker {
    pub fn new(broker_count: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                broker_count,
                topics: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Vec::new()),
                offsets: Mutex::new(HashMap::new()),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                counters: Counters::default(),
                faults: Faults::default(),
            }),
        }
    }

    // ===== Inspection =====

    pub fn create_topics_calls(&self) -> usize {
        self.inner.counters.create_topics.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.inner.counters.metadata.load(Ordering::SeqCst)
    }

    pub fn producer_connects(&self) -> usize {
        self.inner.counters.producer_connects.load(Ordering::SeqCst)
    }

    pub fn consumer_connects(&self) -> usize {
        self.inner.counters.consumer_connects.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.counters.subscribes.load(Ordering::SeqCst)
    }

    pub async fn topics(&self) -> Vec<TopicSpec> {
        let mut topics: Vec<_> = self.inner.topics.lock().await.values().cloned().collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    /// Currently subscribed topics, in subscription order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub async fn sent_to(&self, topic: &str) -> Vec<OutboundRecord> {
        self.inner
            .sent
            .lock()
            .await
            .iter()
            .filter(|sent| sent.record.topic == topic)
            .map(|sent| sent.record.clone())
            .collect()
    }

    /// Producer/consumer connect and disconnect calls, oldest first
    pub async fn lifecycle(&self) -> Vec<&'static str> {
        self.inner.lifecycle.lock().await.clone()
    }

    // ===== Fault injection =====

    pub fn fail_create_topics(&self, fail: bool) {
        self.inner.faults.create_topics.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.inner.faults.metadata.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.inner.faults.connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.faults.subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make every send to `topic` fail until cleared.
    pub async fn fail_sends_to(&self, topic: &str) {
        self.inner
            .faults
            .send_topics
            .lock()
            .await
            .insert(topic.to_string());
    }

    pub async fn clear_send_failures(&self) {
        self.inner.faults.send_topics.lock().await.clear();
    }

    // ===== Inbound =====

    /// Queue a raw message for the consumer, bypassing the producer path.
    pub async fn inject(&self, topic: &str, value: impl Into<Vec<u8>>, headers: HeaderMap) {
        let offset = self.next_offset(topic).await;
        let _ = self.inner.inbound_tx.send(InboundRecord {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: None,
            value: Some(value.into()),
            headers,
        });
    }

    async fn next_offset(&self, topic: &str) -> i64 {
        let mut offsets = self.inner.offsets.lock().await;
        let offset = offsets.entry(topic.to_string()).or_insert(0);
        let current = *offset;
        *offset += 1;
        current
    }

    async fn record_lifecycle(&self, step: &'static str) {
        self.inner.lifecycle.lock().await.push(step);
    }

    async fn is_subscribed(&self, topic: &str) -> bool {
        self.inner
            .subscriptions
            .lock()
            .await
            .iter()
            .any(|(subscribed, _)| subscribed == topic)
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn create_topics(
        &self,
        topics: &[TopicSpec],
    ) -> GatewayResult<Vec<(String, TopicCreation)>> {
        self.inner.counters.create_topics.fetch_add(1, Ordering::SeqCst);
        if self.inner.faults.create_topics.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("admin connection refused"));
        }

        let mut existing = self.inner.topics.lock().await;
        Ok(topics
            .iter()
            .map(|topic| {
                let outcome = if topic.partitions < 1 || topic.replication_factor < 1 {
                    TopicCreation::Failed("invalid partition or replication count".into())
                } else if existing.contains_key(&topic.name) {
                    TopicCreation::AlreadyExists
                } else {
                    existing.insert(topic.name.clone(), topic.clone());
                    TopicCreation::Created
                };
                (topic.name.clone(), outcome)
            })
            .collect())
    }

    async fn fetch_metadata(&self) -> GatewayResult<ClusterMetadata> {
        self.inner.counters.metadata.fetch_add(1, Ordering::SeqCst);
        if self.inner.faults.metadata.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("broker metadata unavailable"));
        }
        Ok(ClusterMetadata {
            broker_count: self.inner.broker_count,
            topic_count: self.inner.topics.lock().await.len(),
        })
    }

    async fn connect_producer(&self) -> GatewayResult<()> {
        self.inner.counters.producer_connects.fetch_add(1, Ordering::SeqCst);
        self.record_lifecycle("connect_producer").await;
        if self.inner.faults.connect.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("producer connection refused"));
        }
        Ok(())
    }

    async fn connect_consumer(&self) -> GatewayResult<()> {
        self.inner.counters.consumer_connects.fetch_add(1, Ordering::SeqCst);
        self.record_lifecycle("connect_consumer").await;
        if self.inner.faults.connect.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("consumer connection refused"));
        }
        Ok(())
    }

    async fn disconnect_producer(&self) -> GatewayResult<()> {
        self.record_lifecycle("disconnect_producer").await;
        // Stands in for the flush a real producer waits on.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn disconnect_consumer(&self) -> GatewayResult<()> {
        self.record_lifecycle("disconnect_consumer").await;
        self.inner.subscriptions.lock().await.clear();
        Ok(())
    }

    async fn send(&self, record: OutboundRecord) -> GatewayResult<DeliveryReceipt> {
        if self.inner.faults.send_topics.lock().await.contains(&record.topic) {
            return Err(GatewayError::transport(format!(
                "leader not available for topic {}",
                record.topic
            )));
        }

        let offset = self.next_offset(&record.topic).await;
        self.inner.sent.lock().await.push(SentRecord {
            offset,
            record: record.clone(),
        });

        if self.is_subscribed(&record.topic).await {
            let _ = self.inner.inbound_tx.send(InboundRecord {
                topic: record.topic,
                partition: 0,
                offset,
                key: record.key.map(String::into_bytes),
                value: Some(record.value),
                headers: record.headers,
            });
        }

        Ok(DeliveryReceipt {
            partition: 0,
            offset,
        })
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> GatewayResult<()> {
        self.inner.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.inner.faults.subscribe.load(Ordering::SeqCst) {
            return Err(GatewayError::Subscribe {
                topic: topic.to_string(),
                reason: "group coordinator not available".into(),
            });
        }
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if subscriptions.iter().any(|(t, _)| t == topic) {
            return Ok(());
        }
        subscriptions.push((topic.to_string(), from_beginning));
        drop(subscriptions);

        // Replay what was already produced to the topic, at its own offsets.
        if from_beginning {
            let sent = self.inner.sent.lock().await;
            for SentRecord { offset, record } in sent.iter().filter(|sent| sent.record.topic == topic) {
                let _ = self.inner.inbound_tx.send(InboundRecord {
                    topic: record.topic.clone(),
                    partition: 0,
                    offset: *offset,
                    key: record.key.clone().map(String::into_bytes),
                    value: Some(record.value.clone()),
                    headers: record.headers.clone(),
                });
            }
        }
        Ok(())
    }

    async fn recv(&self) -> GatewayResult<InboundRecord> {
        self.inner
            .inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| GatewayError::transport("in-memory broker closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str) -> OutboundRecord {
        OutboundRecord {
            topic: topic.into(),
            key: Some("k".into()),
            value: b"{}".to_vec(),
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_topics_reports_existing() {
        let broker = InMemoryBroker::default();
        let catalog = vec![TopicSpec::new("a", 1, 1)];

        let first = broker.create_topics(&catalog).await.unwrap();
        let second = broker.create_topics(&catalog).await.unwrap();

        assert_eq!(first[0].1, TopicCreation::Created);
        assert_eq!(second[0].1, TopicCreation::AlreadyExists);
        assert_eq!(broker.create_topics_calls(), 2);
    }

    #[tokio::test]
    async fn test_send_loops_back_only_when_subscribed() {
        let broker = InMemoryBroker::default();
        broker.send(record("quiet")).await.unwrap();
        broker.subscribe("loud", false).await.unwrap();
        broker.send(record("loud")).await.unwrap();

        let received = broker.recv().await.unwrap();
        assert_eq!(received.topic, "loud");
        assert_eq!(received.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(broker.sent_to("quiet").await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let broker = InMemoryBroker::default();
        broker.fail_sends_to("down").await;
        assert!(broker.send(record("down")).await.is_err());
        assert!(broker.sent_to("down").await.is_empty());

        broker.clear_send_failures().await;
        assert!(broker.send(record("down")).await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_keeps_log_offsets() {
        let broker = InMemoryBroker::default();
        broker.inject("t", b"{}".to_vec(), HeaderMap::new()).await;
        let receipt = broker.send(record("t")).await.unwrap();
        assert_eq!(receipt.offset, 1);

        broker.subscribe("t", true).await.unwrap();

        let injected = broker.recv().await.unwrap();
        let replayed = broker.recv().await.unwrap();
        assert_eq!((injected.offset, replayed.offset), (0, 1));
        assert_eq!(replayed.key.as_deref(), Some(&b"k"[..]));
    }

    #[tokio::test]
    async fn test_lifecycle_log_order() {
        let broker = InMemoryBroker::default();
        broker.connect_producer().await.unwrap();
        broker.connect_consumer().await.unwrap();
        broker.disconnect_consumer().await.unwrap();
        broker.disconnect_producer().await.unwrap();

        assert_eq!(
            broker.lifecycle().await,
            vec!["connect_producer", "connect_consumer", "disconnect_consumer", "disconnect_producer"]
        );
    }
}
