use chrono::{DateTime, Utc};
use serde::Serialize;

/// A validated usage event read from a local session log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LocalUsageEvent {
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub model: Option<String>,
}

impl LocalUsageEvent {
    /// Dedup key; events missing either id are never treated as duplicates.
    pub fn dedup_key(&self) -> Option<(&str, &str)> {
        match (&self.message_id, &self.request_id) {
            (Some(m), Some(r)) => Some((m.as_str(), r.as_str())),
            _ => None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.event_type.as_deref() == Some("assistant")
    }
}
