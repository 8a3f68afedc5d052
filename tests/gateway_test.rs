// ============================================================================
// Event Gateway Integration Tests
// ============================================================================
//
// Drive the public gateway API against the in-memory broker: lifecycle,
// provisioning, publish with dead-letter fallback, dispatch and health.
//
// ============================================================================


use std::sync::Arc;

use budget_events::kafka::{
    ConnectOutcome, ConnectionState, ConsumerOptions, DeadLetterRecord, EventGateway,
    HandlerFailurePolicy, HeaderMap, HealthStatus, InMemoryBroker, PublishMetadata, TopicCatalog,
    TopicSpec,
};
use budget_events::kafka::metrics::gather_metrics;
use budget_events::{GatewayError, KafkaConfig};
use serde_json::json;
use test_utils::{Recorder, settle, spawn_gateway, spawn_gateway_with, wait_until};

// ============================================================================
// Disabled mode
// ============================================================================

#[tokio::test]
async fn test_disabled_gateway_degrades_to_noops() {
    let broker = InMemoryBroker::default();
    let gateway = EventGateway::new(KafkaConfig::disabled(), Arc::new(broker.clone()));

    let outcome = gateway.connect().await;
    assert!(matches!(outcome, ConnectOutcome::Disabled));
    assert!(!outcome.is_available());
    assert_eq!(gateway.state().await, ConnectionState::Disabled);

    let published = gateway
        .publish("budget-events", "budget.created", json!({"id": 1}), None)
        .await;
    assert!(published.is_none());
    assert!(!gateway.send_message("budget-events", &json!("hi")).await);
    assert_eq!(gateway.health_check().await, HealthStatus::Disabled);

    let recorder = Recorder::new();
    gateway
        .register_consumer("budget-events", recorder.handler(), ConsumerOptions::default())
        .await;
    assert!(matches!(
        gateway.ensure_topics(None).await,
        Err(GatewayError::Disabled)
    ));

    gateway.disconnect().await;

    // nothing reached the broker
    assert_eq!(broker.create_topics_calls(), 0);
    assert_eq!(broker.metadata_calls(), 0);
    assert_eq!(broker.producer_connects(), 0);
    assert_eq!(broker.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_empty_broker_env_means_disabled() {
    let config = KafkaConfig::from_lookup(|key| match key {
        "KAFKA_BROKER" => Some("  ".to_string()),
        _ => None,
    });
    let gateway = EventGateway::from_config(config);
    assert!(matches!(gateway.connect().await, ConnectOutcome::Disabled));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_twice_provisions_once() {
    let app = spawn_gateway();

    assert!(matches!(app.gateway.connect().await, ConnectOutcome::Connected));
    assert!(matches!(
        app.gateway.connect().await,
        ConnectOutcome::AlreadyConnected
    ));

    assert_eq!(app.gateway.state().await, ConnectionState::Connected);
    assert!(app.gateway.is_consumer_running().await);
    assert_eq!(app.broker.create_topics_calls(), 1);
    assert_eq!(app.broker.producer_connects(), 1);
    assert_eq!(app.broker.consumer_connects(), 1);

    let names: Vec<String> = app.broker.topics().await.into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec!["budget-events", "dlq-events", "expense-events", "task-events"]
    );
}

#[tokio::test]
async fn test_concurrent_connects_provision_once() {
    let app = spawn_gateway();

    let (a, b) = tokio::join!(app.gateway.connect(), app.gateway.connect());
    assert!(a.is_available() && b.is_available());
    assert_eq!(app.broker.create_topics_calls(), 1);
}

#[tokio::test]
async fn test_connect_failure_rolls_back() {
    let app = spawn_gateway();
    app.broker.fail_connect(true);

    let outcome = app.gateway.connect().await;
    assert!(matches!(outcome, ConnectOutcome::Failed(GatewayError::Transport(_))));
    assert!(!outcome.is_available());
    assert_eq!(app.gateway.state().await, ConnectionState::Disconnected);
    assert!(!app.gateway.is_consumer_running().await);

    // retrying after the broker recovers works
    app.broker.fail_connect(false);
    assert!(matches!(app.gateway.connect().await, ConnectOutcome::Connected));
}

#[tokio::test]
async fn test_provisioning_failure_is_not_fatal() {
    let app = spawn_gateway();
    app.broker.fail_create_topics(true);

    let outcome = app.gateway.connect().await;
    assert!(matches!(outcome, ConnectOutcome::Failed(ref e) if e.is_transient()));
    assert_eq!(app.broker.producer_connects(), 0);
    assert_eq!(app.gateway.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_resets_state_and_subscriptions() {
    let app = spawn_gateway();

    // no-op while not connected
    app.gateway.disconnect().await;
    assert_eq!(app.gateway.state().await, ConnectionState::Disconnected);

    app.gateway.connect().await;
    assert!(!app.broker.subscriptions().await.is_empty());

    app.gateway.disconnect().await;
    assert_eq!(app.gateway.state().await, ConnectionState::Disconnected);
    assert!(!app.gateway.is_consumer_running().await);
    assert!(app.broker.subscriptions().await.is_empty());

    // reconnect subscribes everything again
    app.gateway.connect().await;
    assert_eq!(
        app.broker.subscriptions().await,
        vec!["budget-events", "task-events"]
    );
}

#[tokio::test]
async fn test_disconnect_closes_consumer_before_producer() {
    let app = spawn_gateway();
    app.gateway.connect().await;
    app.gateway.disconnect().await;

    assert_eq!(
        app.broker.lifecycle().await,
        vec!["connect_producer", "connect_consumer", "disconnect_consumer", "disconnect_producer"]
    );
}

#[tokio::test]
async fn test_handler_can_disconnect_gateway() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let handle = app.gateway.clone();
    app.gateway
        .register_consumer(
            "orders",
            move |_| {
                let gateway = handle.clone();
                async move {
                    gateway.disconnect().await;
                    Ok(())
                }
            },
            ConsumerOptions::default(),
        )
        .await;

    app.gateway.publish("orders", "order.cancelled", json!({}), None).await;

    let broker = app.broker.clone();
    wait_until(move || {
        let broker = broker.clone();
        async move { broker.lifecycle().await.contains(&"disconnect_producer") }
    })
    .await;

    let gateway = app.gateway.clone();
    wait_until(move || {
        let gateway = gateway.clone();
        async move { !gateway.is_consumer_running().await }
    })
    .await;
    assert_eq!(app.gateway.state().await, ConnectionState::Disconnected);
    assert!(app.broker.subscriptions().await.is_empty());
    assert_eq!(
        app.broker.lifecycle().await[2..],
        ["disconnect_consumer", "disconnect_producer"]
    );
}

// ============================================================================
// Publish
// ============================================================================

#[tokio::test]
async fn test_publish_requires_connection() {
    let app = spawn_gateway();

    let published = app
        .gateway
        .publish("budget-events", "budget.created", json!({}), None)
        .await;
    assert!(published.is_none());
    assert!(!app.gateway.send_message("budget-events", &json!({})).await);
    assert!(app.broker.sent_to("budget-events").await.is_empty());
}

#[tokio::test]
async fn test_publish_returns_sent_envelope() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let metadata = PublishMetadata::new()
        .with_source("budget-service")
        .with_correlation_id("flow-7")
        .with_tags(["finance", "q3"]);
    let envelope = app
        .gateway
        .publish("expense-events", "expense.created", json!({"amount": 12}), Some(metadata))
        .await
        .expect("publish should succeed");

    assert_eq!(envelope.event_type, "expense.created");
    assert_eq!(envelope.source, "budget-service");
    assert_eq!(envelope.correlation_id, "flow-7");
    assert_eq!(envelope.tags, vec!["finance", "q3"]);
    assert!(!envelope.event_id.is_empty());

    let sent = app.broker.sent_to("expense-events").await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key.as_deref(), Some(envelope.event_id.as_str()));
}

#[tokio::test]
async fn test_publish_failure_routes_to_dead_letter_topic() {
    let app = spawn_gateway();
    app.gateway.connect().await;
    app.broker.fail_sends_to("budget-events").await;

    let published = app
        .gateway
        .publish(
            "budget-events",
            "budget.created",
            json!({"budgetId": "b-1"}),
            Some(PublishMetadata::new().with_event_id("evt-42")),
        )
        .await;
    assert!(published.is_none());

    let dead = app.broker.sent_to("dlq-events").await;
    assert_eq!(dead.len(), 1);
    let record: DeadLetterRecord = serde_json::from_slice(&dead[0].value).unwrap();
    assert_eq!(record.source_topic, "budget-events");
    assert_eq!(record.envelope.event_id, "evt-42");
    assert_eq!(record.envelope.payload, json!({"budgetId": "b-1"}));
}

#[tokio::test]
async fn test_custom_dead_letter_topic() {
    let mut config = KafkaConfig::with_brokers("b1:9092");
    config.dead_letter_topic = "budget-dlq".to_string();
    let app = spawn_gateway_with(config);
    app.gateway.connect().await;

    assert!(app.broker.topics().await.iter().any(|t| t.name == "budget-dlq"));

    app.broker.fail_sends_to("task-events").await;
    app.gateway
        .publish("task-events", "task.assigned", json!({}), None)
        .await;
    assert_eq!(app.broker.sent_to("budget-dlq").await.len(), 1);
}

#[tokio::test]
async fn test_ensure_topics_with_caller_catalog() {
    let app = spawn_gateway();

    let catalog = TopicCatalog::default().with_topic(TopicSpec::new("audit-events", 1, 1));
    app.gateway.ensure_topics(Some(&catalog)).await.unwrap();
    app.gateway.ensure_topics(Some(&catalog)).await.unwrap();

    assert_eq!(app.broker.topics().await.len(), 5);
}

// ============================================================================
// Consume
// ============================================================================

#[tokio::test]
async fn test_register_then_publish_end_to_end() {
    let app = spawn_gateway();
    assert!(app.gateway.connect().await.is_available());
    assert!(app.gateway.connect().await.is_available());
    assert_eq!(app.broker.create_topics_calls(), 1);

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("primary-events", recorder.handler(), ConsumerOptions::default())
        .await;

    app.gateway
        .publish("primary-events", "x.created", json!({"id": 1}), None)
        .await
        .expect("publish should succeed");

    let events = recorder.wait_for(1).await;
    settle().await;
    assert_eq!(recorder.len(), 1);
    assert_eq!(events[0].topic, "primary-events");
    assert_eq!(events[0].event_type(), Some("x.created"));
    assert_eq!(events[0].message["payload"], json!({"id": 1}));
    assert_eq!(events[0].envelope().unwrap().event_type, "x.created");
}

#[tokio::test]
async fn test_registration_before_connect_is_swept() {
    let app = spawn_gateway();

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("expense-events", recorder.handler(), ConsumerOptions::default())
        .await;
    app.gateway
        .register_consumer(
            "expense-events",
            recorder.handler(),
            ConsumerOptions::for_event_type("expense.deleted"),
        )
        .await;
    assert_eq!(app.broker.subscribe_calls(), 0);

    app.gateway.connect().await;

    let subscriptions = app.broker.subscriptions().await;
    assert_eq!(
        subscriptions.iter().filter(|t| *t == "expense-events").count(),
        1
    );
    assert!(subscriptions.contains(&"budget-events".to_string()));
    assert!(subscriptions.contains(&"task-events".to_string()));
}

#[tokio::test]
async fn test_event_type_filtering() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let approved = Recorder::new();
    let everything = Recorder::new();
    app.gateway
        .register_consumer(
            "expense-events",
            approved.handler(),
            ConsumerOptions::for_event_type("expense.approved"),
        )
        .await;
    app.gateway
        .register_consumer("expense-events", everything.handler(), ConsumerOptions::default())
        .await;

    app.gateway
        .publish("expense-events", "expense.created", json!({}), None)
        .await;
    app.gateway
        .publish("expense-events", "expense.approved", json!({}), None)
        .await;

    everything.wait_for(2).await;
    settle().await;
    assert_eq!(approved.len(), 1);
    assert_eq!(approved.events()[0].event_type(), Some("expense.approved"));
}

#[tokio::test]
async fn test_undecodable_message_is_dispatched_raw() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("legacy-events", recorder.handler(), ConsumerOptions::default())
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("origin".to_string(), b"batch".to_vec());
    app.broker.inject("legacy-events", "hello, not json", headers).await;

    let events = recorder.wait_for(1).await;
    assert_eq!(events[0].message, json!({"raw": "hello, not json"}));
    assert_eq!(events[0].headers.get("origin").map(Vec::as_slice), Some(&b"batch"[..]));
}

#[tokio::test]
async fn test_raw_send_message_is_consumed() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("notifications", recorder.handler(), ConsumerOptions::default())
        .await;

    assert!(app.gateway.send_message("notifications", &json!("ping")).await);
    let events = recorder.wait_for(1).await;
    assert_eq!(events[0].message, json!({"raw": "ping"}));
}

#[tokio::test]
async fn test_subscribe_failure_is_a_warning() {
    let app = spawn_gateway();
    app.gateway.connect().await;
    app.broker.fail_subscribe(true);

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("flaky-events", recorder.handler(), ConsumerOptions::default())
        .await;

    assert_eq!(app.gateway.state().await, ConnectionState::Connected);
    assert!(!app.broker.subscriptions().await.contains(&"flaky-events".to_string()));

    // the registration survives and is subscribed on the next connect
    app.broker.fail_subscribe(false);
    app.gateway.disconnect().await;
    app.gateway.connect().await;
    assert!(app.broker.subscriptions().await.contains(&"flaky-events".to_string()));
}

#[tokio::test]
async fn test_from_beginning_replays_history() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    app.gateway
        .publish("archive-events", "archive.stored", json!({"n": 1}), None)
        .await;
    app.gateway
        .publish("archive-events", "archive.stored", json!({"n": 2}), None)
        .await;

    let recorder = Recorder::new();
    app.gateway
        .register_consumer(
            "archive-events",
            recorder.handler(),
            ConsumerOptions::default().from_beginning(),
        )
        .await;

    let events = recorder.wait_for(2).await;
    assert_eq!(events[0].message["payload"], json!({"n": 1}));
    assert_eq!(events[1].message["payload"], json!({"n": 2}));
}

// ============================================================================
// Handler failure policies
// ============================================================================

#[tokio::test]
async fn test_fail_fast_handler_error_stops_dispatch_loop() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let after = Recorder::new();
    app.gateway
        .register_consumer(
            "orders",
            |_| async { Err(anyhow::anyhow!("handler exploded")) },
            ConsumerOptions::default(),
        )
        .await;
    app.gateway
        .register_consumer("orders", after.handler(), ConsumerOptions::default())
        .await;

    app.gateway.publish("orders", "order.created", json!({}), None).await;

    let gateway = app.gateway.clone();
    wait_until(move || {
        let gateway = gateway.clone();
        async move { !gateway.is_consumer_running().await }
    })
    .await;
    assert_eq!(after.len(), 0);

    // a later connect cycle restarts the loop
    app.gateway.disconnect().await;
    app.gateway.connect().await;
    assert!(app.gateway.is_consumer_running().await);
}

#[tokio::test]
async fn test_connect_restarts_stopped_dispatch_loop() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let good = Recorder::new();
    app.gateway
        .register_consumer(
            "orders",
            |_| async { Err(anyhow::anyhow!("handler exploded")) },
            ConsumerOptions::for_event_type("order.bad"),
        )
        .await;
    app.gateway
        .register_consumer("orders", good.handler(), ConsumerOptions::default())
        .await;

    app.gateway.publish("orders", "order.bad", json!({}), None).await;

    let gateway = app.gateway.clone();
    wait_until(move || {
        let gateway = gateway.clone();
        async move { !gateway.is_consumer_running().await }
    })
    .await;

    let outcome = app.gateway.connect().await;
    assert!(matches!(outcome, ConnectOutcome::AlreadyConnected));
    assert!(app.gateway.is_consumer_running().await);

    app.gateway.publish("orders", "order.ok", json!({}), None).await;
    let events = good.wait_for(1).await;
    assert_eq!(events[0].event_type(), Some("order.ok"));
}

#[tokio::test]
async fn test_isolate_policy_keeps_dispatching() {
    let mut config = KafkaConfig::with_brokers("b1:9092");
    config.handler_failure_policy = HandlerFailurePolicy::Isolate;
    let app = spawn_gateway_with(config);
    app.gateway.connect().await;

    let after = Recorder::new();
    app.gateway
        .register_consumer(
            "orders",
            |_| async { Err(anyhow::anyhow!("handler exploded")) },
            ConsumerOptions::default(),
        )
        .await;
    app.gateway
        .register_consumer("orders", after.handler(), ConsumerOptions::default())
        .await;

    app.gateway.publish("orders", "order.created", json!({}), None).await;
    app.gateway.publish("orders", "order.updated", json!({}), None).await;

    let events = after.wait_for(2).await;
    assert_eq!(events[1].event_type(), Some("order.updated"));
    assert!(app.gateway.is_consumer_running().await);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check_is_independent_of_connection() {
    let broker = InMemoryBroker::new(3);
    let gateway = EventGateway::new(KafkaConfig::with_brokers("b1:9092"), Arc::new(broker.clone()));

    // works while disconnected
    assert_eq!(
        gateway.health_check().await,
        HealthStatus::Ok { broker_count: 3 }
    );

    broker.fail_metadata(true);
    let status = gateway.health_check().await;
    assert!(matches!(status, HealthStatus::Error { .. }));
    assert_eq!(
        serde_json::to_value(&status).unwrap()["status"],
        json!("error")
    );
    assert_eq!(broker.producer_connects(), 0);
}

#[tokio::test]
async fn test_publish_and_dispatch_are_exported_as_metrics() {
    let app = spawn_gateway();
    app.gateway.connect().await;

    let recorder = Recorder::new();
    app.gateway
        .register_consumer("metered-events", recorder.handler(), ConsumerOptions::default())
        .await;
    app.gateway.publish("metered-events", "metered.sent", json!({}), None).await;
    recorder.wait_for(1).await;

    // the consume counter is bumped after the handler returns
    wait_until(|| async {
        gather_metrics().unwrap().contains("kafka_consume_success_total")
    })
    .await;
    assert!(gather_metrics().unwrap().contains("kafka_publish_success_total"));
}
