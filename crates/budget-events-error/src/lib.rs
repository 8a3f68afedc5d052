use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised inside the event gateway.
///
/// None of these escape the public publish/health operations; they surface
/// through connect outcomes, handler results and logs.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Configuration =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Messaging is disabled (no broker configured)")]
    Disabled,

    #[error("Gateway is not connected")]
    NotConnected,

    // ===== Broker transport =====
    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Failed to provision topic '{topic}': {reason}")]
    Provisioning { topic: String, reason: String },

    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    // ===== Envelopes =====
    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ===== Dispatch =====
    #[error("Handler for '{topic}' (event type {event_type}) failed: {source}")]
    Handler {
        topic: String,
        event_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Wrap any displayable broker-client error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        GatewayError::Transport(err.to_string())
    }

    /// Whether retrying `connect()` later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_)
                | GatewayError::Provisioning { .. }
                | GatewayError::Subscribe { .. }
        )
    }
}
