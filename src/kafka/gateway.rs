// ============================================================================
// Event Gateway
// ============================================================================
//
// Owns the connection lifecycle and ties together provisioning, publishing,
// dispatch and health checks behind one cloneable handle.
//
// State machine:
//   Disabled      - no broker configured; terminal, every call is a no-op
//   Disconnected  - configured but not (or no longer) connected
//   Connected     - topics provisioned, producer and consumer open
//
// The gateway never reconnects on its own. Callers retry `connect()`, which
// also restarts a dispatch loop stopped by a fail-fast handler error.
//
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use budget_events_config::{
    BUDGET_EVENTS_TOPIC, HandlerFailurePolicy, KafkaConfig, TASK_EVENTS_TOPIC,
};
use budget_events_error::{GatewayError, GatewayResult};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::admin::{TopicCatalog, TopicProvisioner};
use super::consumer::{ConsumerOptions, ConsumerRegistry};
use super::envelope::EnvelopeBuilder;
use super::health::{HealthMonitor, HealthStatus};
use super::metrics;
use super::producer::EventPublisher;
use super::transport::BrokerTransport;
use super::types::{EventEnvelope, InboundEvent, PublishMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disabled,
    Disconnected,
    Connected,
}

/// Result of [`EventGateway::connect`]
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
    /// No broker configured; nothing was attempted
    Disabled,
    /// Connecting failed and was rolled back
    Failed(GatewayError),
}

impl ConnectOutcome {
    /// Whether messaging can be used after this call.
    pub fn is_available(&self) -> bool {
        matches!(self, ConnectOutcome::Connected | ConnectOutcome::AlreadyConnected)
    }
}

struct Backend {
    transport: Arc<dyn BrokerTransport>,
    provisioner: TopicProvisioner,
    publisher: EventPublisher,
}

/// The spawned dispatch loop; it exits after the current message once `stop`
/// is set.
struct DispatchTask {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct Inner {
    backend: Option<Backend>,
    health: HealthMonitor,
    registry: Arc<ConsumerRegistry>,
    policy: HandlerFailurePolicy,
    state: RwLock<ConnectionState>,
    lifecycle: Mutex<()>,
    dispatch_task: Mutex<Option<DispatchTask>>,
    builtins_registered: AtomicBool,
}

/// Handle to the messaging gateway. Construct once at startup and clone it
/// into whatever needs to publish or consume.
#[derive(Clone)]
pub struct EventGateway {
    inner: Arc<Inner>,
}

impl EventGateway {
    /// Gateway over an explicit transport. A disabled `config` wins over the
    /// transport.
    pub fn new(config: KafkaConfig, transport: Arc<dyn BrokerTransport>) -> Self {
        Self::with_envelope_builder(config, transport, EnvelopeBuilder::default())
    }

    pub fn with_envelope_builder(
        config: KafkaConfig,
        transport: Arc<dyn BrokerTransport>,
        builder: EnvelopeBuilder,
    ) -> Self {
        if !config.is_enabled() {
            return Self::disabled();
        }

        let provisioner = TopicProvisioner::new(
            transport.clone(),
            TopicCatalog::with_dead_letter_topic(&config.dead_letter_topic),
        );
        let publisher = EventPublisher::new(transport.clone(), builder, config.dead_letter_topic.clone());

        Self::build(
            Some(Backend {
                transport: transport.clone(),
                provisioner,
                publisher,
            }),
            HealthMonitor::new(transport),
            config.handler_failure_policy,
        )
    }

    /// A gateway with no broker: every operation degrades to a no-op.
    pub fn disabled() -> Self {
        Self::build(None, HealthMonitor::disabled(), HandlerFailurePolicy::default())
    }

    /// Gateway backed by the rdkafka transport, or disabled when no broker
    /// is configured.
    pub fn from_config(config: KafkaConfig) -> Self {
        if !config.is_enabled() {
            info!("Kafka messaging disabled (KAFKA_BROKER not set)");
            return Self::disabled();
        }

        #[cfg(feature = "kafka")]
        {
            let transport = Arc::new(super::client::RdKafkaTransport::new(config.clone()));
            Self::new(config, transport)
        }

        #[cfg(not(feature = "kafka"))]
        {
            warn!(
                brokers = %config.bootstrap_servers(),
                "Built without the `kafka` feature; messaging disabled"
            );
            Self::disabled()
        }
    }

    fn build(backend: Option<Backend>, health: HealthMonitor, policy: HandlerFailurePolicy) -> Self {
        let state = if backend.is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Disabled
        };

        Self {
            inner: Arc::new(Inner {
                backend,
                health,
                registry: Arc::new(ConsumerRegistry::new()),
                policy,
                state: RwLock::new(state),
                lifecycle: Mutex::new(()),
                dispatch_task: Mutex::new(None),
                builtins_registered: AtomicBool::new(false),
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Whether the inbound dispatch loop is alive.
    pub async fn is_consumer_running(&self) -> bool {
        self.inner
            .dispatch_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Provision topics, open the producer and consumer, subscribe every
    /// registered topic and start the dispatch loop.
    ///
    /// Never fails the caller: a broken broker is reported as
    /// [`ConnectOutcome::Failed`] and leaves the gateway `Disconnected`.
    pub async fn connect(&self) -> ConnectOutcome {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let Some(backend) = &self.inner.backend else {
            debug!("Kafka connect skipped: messaging disabled");
            return ConnectOutcome::Disabled;
        };

        if self.state().await == ConnectionState::Connected {
            debug!("Kafka already connected");
            if !self.is_consumer_running().await {
                warn!("Kafka dispatch loop not running; restarting it");
                self.start_dispatch_loop(backend).await;
            }
            return ConnectOutcome::AlreadyConnected;
        }

        match self.open(backend).await {
            Ok(()) => {
                info!("Kafka producer and consumer connected");
                ConnectOutcome::Connected
            }
            Err(e) => {
                warn!(error = %e, "Kafka connection failed; messaging unavailable");
                self.close(backend).await;
                ConnectOutcome::Failed(e)
            }
        }
    }

    async fn open(&self, backend: &Backend) -> GatewayResult<()> {
        backend.provisioner.ensure_topics(None).await?;
        backend.transport.connect_producer().await?;
        backend.transport.connect_consumer().await?;

        *self.inner.state.write().await = ConnectionState::Connected;

        if !self.inner.builtins_registered.swap(true, Ordering::SeqCst) {
            self.register_builtin_consumers().await;
        }

        let subscribed = self
            .inner
            .registry
            .subscribe_all(backend.transport.as_ref())
            .await?;
        debug!(subscribed = subscribed, "Subscribed registered topics");

        self.start_dispatch_loop(backend).await;
        Ok(())
    }

    /// Audit logging for the budget and task streams.
    async fn register_builtin_consumers(&self) {
        for topic in [BUDGET_EVENTS_TOPIC, TASK_EVENTS_TOPIC] {
            self.inner
                .registry
                .register(topic, log_event, &ConsumerOptions::default())
                .await;
        }
    }

    async fn start_dispatch_loop(&self, backend: &Backend) {
        let mut task = self.inner.dispatch_task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let transport = backend.transport.clone();
        let registry = self.inner.registry.clone();
        let policy = self.inner.policy;
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_dispatch_loop(transport, registry, policy, stop.clone()));
        *task = Some(DispatchTask { handle, stop });
    }

    /// Stop the dispatch loop and close consumer then producer. No-op unless
    /// connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let Some(backend) = &self.inner.backend else {
            return;
        };
        if self.state().await != ConnectionState::Connected {
            return;
        }

        self.close(backend).await;
        info!("Kafka producer and consumer disconnected");
    }

    async fn close(&self, backend: &Backend) {
        if let Some(task) = self.inner.dispatch_task.lock().await.take() {
            // A handler disconnecting from inside the loop must not abort the
            // task running this very call.
            let in_dispatch_loop = tokio::task::try_id() == Some(task.handle.id());
            task.stop.store(true, Ordering::SeqCst);
            if !in_dispatch_loop {
                task.handle.abort();
            }
        }

        *self.inner.state.write().await = ConnectionState::Disconnected;
        self.inner.registry.clear_subscriptions().await;

        if let Err(e) = backend.transport.disconnect_consumer().await {
            warn!(error = %e, "Error disconnecting Kafka consumer");
        }
        if let Err(e) = backend.transport.disconnect_producer().await {
            warn!(error = %e, "Error disconnecting Kafka producer");
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Create the topics in `catalog`, or the default catalog.
    pub async fn ensure_topics(&self, catalog: Option<&TopicCatalog>) -> GatewayResult<()> {
        match &self.inner.backend {
            Some(backend) => backend.provisioner.ensure_topics(catalog).await,
            None => Err(GatewayError::Disabled),
        }
    }

    /// Publish `payload` wrapped in an event envelope.
    ///
    /// # Arguments
    /// * `topic` - Destination topic
    /// * `event_type` - Required classification, e.g. "budget.created"
    /// * `payload` - Opaque event body
    /// * `metadata` - Optional key, ids, source, tags and headers
    ///
    /// # Returns
    /// The envelope that was sent, or `None` when messaging is unavailable or
    /// the send failed (the failed envelope is dead-lettered).
    pub async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: Value,
        metadata: Option<PublishMetadata>,
    ) -> Option<EventEnvelope> {
        let backend = self.inner.backend.as_ref()?;
        if !self.is_connected().await {
            debug!(topic = %topic, event_type = %event_type, "Kafka not connected, event not published");
            return None;
        }

        backend
            .publisher
            .publish(topic, event_type, payload, &metadata.unwrap_or_default())
            .await
    }

    /// Send a bare value with no envelope and no dead-letter fallback.
    pub async fn send_message(&self, topic: &str, message: &Value) -> bool {
        let Some(backend) = &self.inner.backend else {
            return false;
        };
        if !self.is_connected().await {
            debug!(topic = %topic, "Kafka not connected, message not sent");
            return false;
        }

        backend.publisher.send_message(topic, message).await
    }

    /// Register `handler` for messages on `topic`.
    ///
    /// When connected the topic is subscribed immediately; otherwise on the
    /// next successful `connect()`. A subscribe failure is logged and the
    /// registration kept.
    pub async fn register_consumer<F, Fut>(&self, topic: &str, handler: F, options: ConsumerOptions)
    where
        F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Some(backend) = &self.inner.backend else {
            debug!(topic = %topic, "Kafka disabled, consumer registration ignored");
            return;
        };

        self.inner.registry.register(topic, handler, &options).await;

        if self.is_connected().await {
            if let Err(e) = self
                .inner
                .registry
                .subscribe_topic(backend.transport.as_ref(), topic, options.from_beginning)
                .await
            {
                warn!(error = %e, topic = %topic, "Failed to subscribe Kafka topic");
            }
        }
    }

    /// Check the cluster. Works in any state and never fails.
    pub async fn health_check(&self) -> HealthStatus {
        self.inner.health.check().await
    }
}

async fn log_event(event: InboundEvent) -> anyhow::Result<()> {
    info!(
        topic = %event.topic,
        partition = event.partition,
        event_type = event.event_type().unwrap_or("-"),
        message = %event.message,
        "Event received"
    );
    Ok(())
}

async fn run_dispatch_loop(
    transport: Arc<dyn BrokerTransport>,
    registry: Arc<ConsumerRegistry>,
    policy: HandlerFailurePolicy,
    stop: Arc<AtomicBool>,
) {
    info!(policy = ?policy, "Kafka dispatch loop started");

    loop {
        let record = match transport.recv().await {
            Ok(record) => record,
            Err(e) => {
                metrics::KAFKA_CONSUME_FAILURE.inc();
                error!(error = %e, "Kafka consumer error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        match registry.dispatch(record, policy).await {
            Ok(_) => metrics::KAFKA_CONSUME_SUCCESS.inc(),
            Err(e) => {
                error!(error = %e, "Kafka handler failed; dispatch loop stopped");
                return;
            }
        }

        if stop.load(Ordering::SeqCst) {
            info!("Kafka dispatch loop stopped");
            return;
        }
    }
}
