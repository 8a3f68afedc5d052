use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::transport::BrokerTransport;

/// Result of a broker reachability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    /// No broker configured; nothing was contacted
    Disabled,
    Ok {
        #[serde(rename = "brokerCount")]
        broker_count: usize,
    },
    Error {
        error: String,
    },
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok { .. })
    }
}

/// Checks the cluster over the admin path only, so it works regardless of
/// producer/consumer connection state.
#[derive(Clone)]
pub struct HealthMonitor {
    transport: Option<Arc<dyn BrokerTransport>>,
}

impl HealthMonitor {
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    pub fn disabled() -> Self {
        Self { transport: None }
    }

    pub async fn check(&self) -> HealthStatus {
        let Some(transport) = &self.transport else {
            return HealthStatus::Disabled;
        };

        match transport.fetch_metadata().await {
            Ok(metadata) => HealthStatus::Ok {
                broker_count: metadata.broker_count,
            },
            Err(e) => {
                warn!(error = %e, "Kafka health check failed");
                HealthStatus::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}
