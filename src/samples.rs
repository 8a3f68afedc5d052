// ============================================================================
// Sample Events
// ============================================================================
//
// JSON Lines fixtures published by the demo runner, one event per line:
//   {"topic": "...", "eventType": "...", "payload": {...}, "key": "...", "correlationId": "..."}
//
// ============================================================================

use std::path::Path;

use budget_events_error::GatewayResult;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::kafka::PublishMetadata;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleEvent {
    pub topic: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl SampleEvent {
    /// Publish metadata for this event, stamped with `source`.
    pub fn metadata(&self, source: &str) -> PublishMetadata {
        let mut metadata = PublishMetadata::new().with_source(source);
        metadata.key = self.key.clone();
        metadata.correlation_id = self.correlation_id.clone();
        metadata
    }
}

/// Parse JSON Lines, skipping blank and malformed lines.
pub fn parse_sample_events(content: &str) -> Vec<SampleEvent> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed sample event");
                None
            }
        })
        .collect()
}

/// Load sample events from `path`. A missing file yields no events.
pub fn load_sample_events(path: impl AsRef<Path>) -> GatewayResult<Vec<SampleEvent>> {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(content) => Ok(parse_sample_events(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
