// ============================================================================
// Kafka Demo Runner
// ============================================================================
//
// Connects the gateway, logs events from the budget and expense streams and
// publishes the sample events file (or one demo event when there is none).
// Runs until SIGTERM / Ctrl-C, then disconnects and logs the gateway
// counters in Prometheus text format.
//
// ============================================================================

use anyhow::Result;
use budget_events::kafka::metrics::gather_metrics;
use budget_events::kafka::{BUDGET_EVENTS_TOPIC, EXPENSE_EVENTS_TOPIC};
use budget_events::samples::load_sample_events;
use budget_events::{Config, ConsumerOptions, EventGateway, InboundEvent, PublishMetadata};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_SOURCE: &str = "kafka-demo";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.logging.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Kafka Demo Starting ===");
    info!("Kafka Enabled: {}", config.kafka.is_enabled());
    info!("Kafka Brokers: {}", config.kafka.bootstrap_servers());

    let gateway = EventGateway::from_config(config.kafka.clone());

    let outcome = gateway.connect().await;
    if !outcome.is_available() {
        warn!(outcome = ?outcome, "Kafka unavailable, nothing to demo");
        return Ok(());
    }

    gateway
        .register_consumer(BUDGET_EVENTS_TOPIC, log_budget_event, ConsumerOptions::default())
        .await;
    gateway
        .register_consumer(EXPENSE_EVENTS_TOPIC, log_expense_event, ConsumerOptions::default())
        .await;

    let status = gateway.health_check().await;
    info!(status = %serde_json::to_string(&status)?, "Kafka health");

    let events = load_sample_events(&config.demo.sample_events_path)?;
    info!(count = events.len(), path = %config.demo.sample_events_path, "Loaded sample events");

    for event in &events {
        gateway
            .publish(
                &event.topic,
                &event.event_type,
                event.payload.clone(),
                Some(event.metadata(DEMO_SOURCE)),
            )
            .await;
    }

    if events.is_empty() {
        gateway
            .publish(
                BUDGET_EVENTS_TOPIC,
                "budget.demo",
                json!({
                    "budgetId": "demo-budget-1",
                    "name": "Demo Budget",
                    "limit": 1000,
                }),
                Some(PublishMetadata::new().with_source(DEMO_SOURCE)),
            )
            .await;
    }

    wait_for_shutdown().await;

    gateway.disconnect().await;

    match gather_metrics() {
        Ok(text) => info!(metrics = %text, "Kafka gateway metrics"),
        Err(e) => warn!(error = %e, "Failed to gather metrics"),
    }

    info!("Kafka demo stopped");
    Ok(())
}

async fn log_budget_event(event: InboundEvent) -> Result<()> {
    info!(
        event_type = event.event_type().unwrap_or("-"),
        budget_id = %event.message["payload"]["budgetId"],
        "Budget event received"
    );
    Ok(())
}

async fn log_expense_event(event: InboundEvent) -> Result<()> {
    info!(
        event_type = event.event_type().unwrap_or("-"),
        expense_id = %event.message["payload"]["expenseId"],
        "Expense event received"
    );
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down...");
    }
}
