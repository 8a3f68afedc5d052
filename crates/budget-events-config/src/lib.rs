// ============================================================================
// Budget Events Config - Centralized configuration management
// ============================================================================
//
// Configuration for the event-messaging gateway and the binaries that host
// it. Values are read once from the environment (optionally seeded from a
// `.env` file) with defaults for everything except the broker list.
//
// ============================================================================

mod constants;
mod kafka;
mod logging;

pub use constants::{
    BUDGET_EVENTS_TOPIC, DEFAULT_CLIENT_ID, DEFAULT_DLQ_TOPIC, DEFAULT_EVENT_SOURCE,
    DEFAULT_GROUP_ID, EXPENSE_EVENTS_TOPIC, TASK_EVENTS_TOPIC,
};
pub use kafka::{
    BrokerLogLevel, HandlerFailurePolicy, KafkaConfig, SaslCredentials, TlsMaterial,
    normalize_pem, parse_broker_list,
};
pub use logging::{DemoConfig, LoggingConfig};

/// Main configuration structure
#[derive(Clone, Debug)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let kafka = KafkaConfig::from_env();
        if !kafka.is_enabled() {
            tracing::debug!("KAFKA_BROKER not set; messaging will run disabled");
        }

        Ok(Self {
            kafka,
            logging: LoggingConfig::from_env(),
            demo: DemoConfig::from_env(),
        })
    }
}
