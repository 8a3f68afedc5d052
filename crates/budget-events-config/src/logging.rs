// ============================================================================
// Logging and Demo Configuration
// ============================================================================

use crate::constants::{DEFAULT_RUST_LOG, DEFAULT_SAMPLE_EVENTS_PATH};

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub rust_log: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rust_log: DEFAULT_RUST_LOG.to_string(),
        }
    }
}

/// Settings for the demo runner binary
#[derive(Clone, Debug)]
pub struct DemoConfig {
    /// JSON Lines file of sample events to publish
    pub sample_events_path: String,
}

impl DemoConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            sample_events_path: std::env::var("KAFKA_SAMPLE_EVENTS")
                .unwrap_or_else(|_| DEFAULT_SAMPLE_EVENTS_PATH.to_string()),
        }
    }
}
