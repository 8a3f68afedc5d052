// ============================================================================
// Kafka Configuration
// ============================================================================

use std::fmt;

use crate::constants::*;

/// Broker client verbosity, named after the levels operators already use in
/// `KAFKA_LOG_LEVEL`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BrokerLogLevel {
    Nothing,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl BrokerLogLevel {
    /// Unknown values fall back to `Warn`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "NOTHING" | "OFF" => Self::Nothing,
            "ERROR" => Self::Error,
            "WARN" | "WARNING" => Self::Warn,
            "INFO" => Self::Info,
            "DEBUG" => Self::Debug,
            _ => Self::Warn,
        }
    }
}

/// What the dispatcher does when a handler returns an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandlerFailurePolicy {
    /// Stop dispatching the current message and terminate the consumer loop.
    #[default]
    FailFast,
    /// Log the failure and keep invoking the remaining handlers.
    Isolate,
}

impl HandlerFailurePolicy {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" | "isolated" | "continue" => Self::Isolate,
            _ => Self::FailFast,
        }
    }
}

/// TLS material. PEM values are kept inline; `ca_location` points at a file
/// instead when the CA is mounted on disk.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca_pem: Option<String>,
    pub ca_location: Option<String>,
    pub cert_pem: Option<String>,
    pub key_pem: Option<String>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.as_ref().map(|_| "<redacted>"))
            .field("ca_location", &self.ca_location)
            .field("cert_pem", &self.cert_pem.as_ref().map(|_| "<redacted>"))
            .field("key_pem", &self.key_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// SASL credential (e.g. "PLAIN", "SCRAM-SHA-256")
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Kafka configuration for the event gateway.
///
/// Immutable once read. An empty broker list means messaging is disabled and
/// every gateway operation degrades to a no-op.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Scheme-stripped broker addresses (e.g. ["kafka1:9092", "kafka2:9092"])
    pub brokers: Vec<String>,
    pub client_id: String,
    /// Consumer group for the inbound dispatch loop
    pub group_id: String,
    pub log_level: BrokerLogLevel,
    pub tls: Option<TlsMaterial>,
    pub sasl: Option<SaslCredentials>,
    /// Fallback topic for envelopes that could not be published
    pub dead_letter_topic: String,
    /// Client-wide `auto.offset.reset=earliest` for the rdkafka consumer
    pub consumer_from_beginning: bool,
    pub handler_failure_policy: HandlerFailurePolicy,
    pub admin_timeout_ms: u64,
    // producer-specific settings
    pub producer_acks: String,        // "all" | "1" | "0"
    pub producer_compression: String, // "none" | "gzip" | "snappy" | "lz4" | "zstd"
    pub producer_linger_ms: u32,
    pub producer_delivery_timeout_ms: u32,
    pub producer_enable_idempotence: bool,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            log_level: BrokerLogLevel::default(),
            tls: None,
            sasl: None,
            dead_letter_topic: DEFAULT_DLQ_TOPIC.to_string(),
            consumer_from_beginning: false,
            handler_failure_policy: HandlerFailurePolicy::default(),
            admin_timeout_ms: DEFAULT_ADMIN_TIMEOUT_MS,
            producer_acks: DEFAULT_PRODUCER_ACKS.to_string(),
            producer_compression: DEFAULT_PRODUCER_COMPRESSION.to_string(),
            producer_linger_ms: DEFAULT_PRODUCER_LINGER_MS,
            producer_delivery_timeout_ms: DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS,
            producer_enable_idempotence: true,
        }
    }
}

impl KafkaConfig {
    /// Configuration with the given comma-separated broker list and defaults
    /// for everything else.
    pub fn with_brokers(brokers: &str) -> Self {
        Self {
            brokers: parse_broker_list(brokers),
            ..Self::default()
        }
    }

    /// Configuration with no brokers: the gateway stays `Disabled`.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Messaging is enabled iff at least one broker is configured.
    pub fn is_enabled(&self) -> bool {
        !self.brokers.is_empty()
    }

    /// Broker list in librdkafka `bootstrap.servers` form.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tls = var("KAFKA_SSL_CA")
            .map(|ca| TlsMaterial {
                ca_pem: Some(normalize_pem(&ca)),
                ca_location: None,
                cert_pem: var("KAFKA_SSL_CERT").map(|v| normalize_pem(&v)),
                key_pem: var("KAFKA_SSL_KEY").map(|v| normalize_pem(&v)),
            })
            .or_else(|| {
                var("KAFKA_SSL_CA_LOCATION").map(|location| TlsMaterial {
                    ca_location: Some(location),
                    cert_pem: var("KAFKA_SSL_CERT").map(|v| normalize_pem(&v)),
                    key_pem: var("KAFKA_SSL_KEY").map(|v| normalize_pem(&v)),
                    ..TlsMaterial::default()
                })
            });

        let sasl = var("KAFKA_SASL_USERNAME").map(|username| SaslCredentials {
            mechanism: var("KAFKA_SASL_MECHANISM")
                .unwrap_or_else(|| DEFAULT_SASL_MECHANISM.to_string()),
            username,
            password: lookup("KAFKA_SASL_PASSWORD").unwrap_or_default(),
        });

        Self {
            brokers: var("KAFKA_BROKER")
                .map(|v| parse_broker_list(&v))
                .unwrap_or_default(),
            client_id: var("KAFKA_CLIENT_ID").unwrap_or(defaults.client_id),
            group_id: var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            log_level: var("KAFKA_LOG_LEVEL")
                .map(|v| BrokerLogLevel::parse(&v))
                .unwrap_or_default(),
            tls,
            sasl,
            dead_letter_topic: var("KAFKA_DLQ_TOPIC").unwrap_or(defaults.dead_letter_topic),
            consumer_from_beginning: var("KAFKA_CONSUMER_FROM_BEGINNING")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.consumer_from_beginning),
            handler_failure_policy: var("KAFKA_HANDLER_FAILURE_POLICY")
                .map(|v| HandlerFailurePolicy::parse(&v))
                .unwrap_or_default(),
            admin_timeout_ms: var("KAFKA_ADMIN_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.admin_timeout_ms),
            producer_acks: var("KAFKA_PRODUCER_ACKS").unwrap_or(defaults.producer_acks),
            producer_compression: var("KAFKA_PRODUCER_COMPRESSION")
                .unwrap_or(defaults.producer_compression),
            producer_linger_ms: var("KAFKA_PRODUCER_LINGER_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.producer_linger_ms),
            producer_delivery_timeout_ms: var("KAFKA_PRODUCER_DELIVERY_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.producer_delivery_timeout_ms),
            producer_enable_idempotence: var("KAFKA_PRODUCER_ENABLE_IDEMPOTENCE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.producer_enable_idempotence),
        }
    }
}

/// Split a comma-separated broker list, stripping `scheme://` prefixes and
/// dropping empty entries.
pub fn parse_broker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(strip_scheme)
        .filter(|broker| !broker.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_scheme(broker: &str) -> &str {
    let broker = broker.trim();
    match broker.find("://") {
        Some(pos) if pos > 0 && broker[..pos].chars().all(|c| c.is_ascii_alphabetic()) => {
            broker[pos + 3..].trim()
        }
        _ => broker,
    }
}

/// PEM blobs passed through env vars usually carry literal `\n` sequences.
pub fn normalize_pem(value: &str) -> String {
    value.replace("\\n", "\n")
}
