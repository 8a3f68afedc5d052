// ============================================================================
// Configuration Constants
// ============================================================================

// Process identity
pub const DEFAULT_CLIENT_ID: &str = "budget-manager";
pub const DEFAULT_GROUP_ID: &str = "budget-manager-workers";

// Envelope `source` used when the caller does not supply one
pub const DEFAULT_EVENT_SOURCE: &str = "budget-manager";

// Default topic catalog
pub const BUDGET_EVENTS_TOPIC: &str = "budget-events";
pub const EXPENSE_EVENTS_TOPIC: &str = "expense-events";
pub const TASK_EVENTS_TOPIC: &str = "task-events";
pub const DEFAULT_DLQ_TOPIC: &str = "dlq-events";

// Admin operations (topic creation, metadata) in milliseconds
pub(crate) const DEFAULT_ADMIN_TIMEOUT_MS: u64 = 10_000;

// Producer defaults
pub(crate) const DEFAULT_PRODUCER_ACKS: &str = "all";
pub(crate) const DEFAULT_PRODUCER_COMPRESSION: &str = "none";
pub(crate) const DEFAULT_PRODUCER_LINGER_MS: u32 = 10;
pub(crate) const DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS: u32 = 120_000;

pub(crate) const DEFAULT_SASL_MECHANISM: &str = "PLAIN";

pub(crate) const DEFAULT_RUST_LOG: &str = "info,rdkafka=warn";
pub(crate) const DEFAULT_SAMPLE_EVENTS_PATH: &str = "files/kafka/sample-events.jsonl";
