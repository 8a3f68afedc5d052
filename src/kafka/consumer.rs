use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use budget_events_config::HandlerFailurePolicy;
use budget_events_error::{GatewayError, GatewayResult};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use super::metrics;
use super::transport::BrokerTransport;
use super::types::{InboundEvent, InboundRecord};

/// Type-erased async handler
pub type EventHandler = Arc<dyn Fn(InboundEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Which event types a registration receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTypeFilter {
    /// `*`: every message on the topic
    Any,
    Exact(String),
}

impl EventTypeFilter {
    pub fn matches(&self, event_type: Option<&str>) -> bool {
        match self {
            EventTypeFilter::Any => true,
            EventTypeFilter::Exact(expected) => event_type == Some(expected.as_str()),
        }
    }
}

impl From<Option<String>> for EventTypeFilter {
    fn from(value: Option<String>) -> Self {
        match value {
            None => EventTypeFilter::Any,
            Some(v) if v.is_empty() || v == "*" => EventTypeFilter::Any,
            Some(v) => EventTypeFilter::Exact(v),
        }
    }
}

impl fmt::Display for EventTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTypeFilter::Any => f.write_str("*"),
            EventTypeFilter::Exact(event_type) => f.write_str(event_type),
        }
    }
}

/// Registration key: topic plus event-type filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub topic: String,
    pub event_type: EventTypeFilter,
}

/// Options accepted by `register_consumer`
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    /// Restrict the handler to one event type; `None` or `"*"` means all
    pub event_type: Option<String>,
    /// Start from the earliest offset when the topic is first subscribed and
    /// the consumer group has no committed offset for it
    pub from_beginning: bool,
}

impl ConsumerOptions {
    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    pub fn from_beginning(mut self) -> Self {
        self.from_beginning = true;
        self
    }
}

struct Registration {
    key: HandlerKey,
    from_beginning: bool,
    handler: EventHandler,
}

/// Counts for a single dispatched message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Handler registry and inbound dispatcher.
///
/// Registrations are kept in insertion order, which is also the dispatch
/// order. Several registrations may share a key.
#[derive(Default)]
pub struct ConsumerRegistry {
    registrations: RwLock<Vec<Arc<Registration>>>,
    subscribed: Mutex<HashSet<String>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handler. Does not subscribe; see [`Self::subscribe_topic`].
    pub async fn register<F, Fut>(&self, topic: &str, handler: F, options: &ConsumerOptions) -> HandlerKey
    where
        F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = HandlerKey {
            topic: topic.to_string(),
            event_type: EventTypeFilter::from(options.event_type.clone()),
        };
        let erased: EventHandler =
            Arc::new(move |event| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(handler(event)) });

        self.registrations.write().await.push(Arc::new(Registration {
            key: key.clone(),
            from_beginning: options.from_beginning,
            handler: erased,
        }));

        debug!(topic = %key.topic, event_type = %key.event_type, "Registered Kafka consumer");
        key
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }

    /// Registered topics in first-registration order, each once, with
    /// whether any registration asked to start from the beginning.
    pub async fn topics(&self) -> Vec<(String, bool)> {
        let registrations = self.registrations.read().await;
        let mut topics: Vec<(String, bool)> = Vec::new();
        for registration in registrations.iter() {
            match topics.iter_mut().find(|(t, _)| *t == registration.key.topic) {
                Some((_, from_beginning)) => *from_beginning |= registration.from_beginning,
                None => topics.push((registration.key.topic.clone(), registration.from_beginning)),
            }
        }
        topics
    }

    /// Subscribe `topic` unless it already is.
    ///
    /// # Returns
    /// * `Ok(true)` - newly subscribed
    /// * `Ok(false)` - already subscribed, nothing sent to the broker
    pub async fn subscribe_topic(
        &self,
        transport: &dyn BrokerTransport,
        topic: &str,
        from_beginning: bool,
    ) -> GatewayResult<bool> {
        let mut subscribed = self.subscribed.lock().await;
        if subscribed.contains(topic) {
            return Ok(false);
        }
        transport.subscribe(topic, from_beginning).await?;
        subscribed.insert(topic.to_string());
        Ok(true)
    }

    /// Subscribe every registered topic that is not subscribed yet.
    pub async fn subscribe_all(&self, transport: &dyn BrokerTransport) -> GatewayResult<usize> {
        let mut newly = 0;
        for (topic, from_beginning) in self.topics().await {
            if self.subscribe_topic(transport, &topic, from_beginning).await? {
                newly += 1;
            }
        }
        Ok(newly)
    }

    pub async fn subscribed_topics(&self) -> HashSet<String> {
        self.subscribed.lock().await.clone()
    }

    pub async fn clear_subscriptions(&self) {
        self.subscribed.lock().await.clear();
    }

    /// Decode `record` and invoke every matching handler in registration
    /// order, one after another.
    ///
    /// With [`HandlerFailurePolicy::FailFast`] the first handler error stops
    /// dispatch of this message and is returned. With
    /// [`HandlerFailurePolicy::Isolate`] errors are logged and counted.
    pub async fn dispatch(
        &self,
        record: InboundRecord,
        policy: HandlerFailurePolicy,
    ) -> GatewayResult<DispatchReport> {
        let event = decode(record);
        let event_type = event.event_type().map(str::to_string);

        // Snapshot so handlers may register further consumers.
        let matching: Vec<Arc<Registration>> = self
            .registrations
            .read()
            .await
            .iter()
            .filter(|r| r.key.topic == event.topic && r.key.event_type.matches(event_type.as_deref()))
            .cloned()
            .collect();

        let mut report = DispatchReport::default();
        for registration in matching {
            report.invoked += 1;
            if let Err(e) = (registration.handler)(event.clone()).await {
                metrics::KAFKA_HANDLER_FAILURE.inc();
                report.failed += 1;
                match policy {
                    HandlerFailurePolicy::FailFast => {
                        return Err(GatewayError::Handler {
                            topic: event.topic.clone(),
                            event_type: registration.key.event_type.to_string(),
                            source: e,
                        });
                    }
                    HandlerFailurePolicy::Isolate => {
                        error!(
                            error = %e,
                            topic = %event.topic,
                            event_type = %registration.key.event_type,
                            "Kafka handler failed"
                        );
                    }
                }
            }
        }

        if report.invoked == 0 {
            debug!(topic = %event.topic, "No handler matched inbound message");
        }
        Ok(report)
    }
}

/// Parse the message value as JSON; anything else becomes `{"raw": text}`.
pub fn decode(record: InboundRecord) -> InboundEvent {
    let bytes = record.value.unwrap_or_default();
    let message = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => value,
        Err(_) => {
            metrics::KAFKA_DECODE_FALLBACK.inc();
            let raw = String::from_utf8_lossy(&bytes).into_owned();
            warn!(topic = %record.topic, offset = record.offset, "Inbound message is not JSON, dispatching raw");
            json!({ "raw": raw })
        }
    };

    InboundEvent {
        topic: record.topic,
        partition: record.partition,
        message,
        headers: record.headers,
    }
}
