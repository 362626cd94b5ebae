//! Local session models: the windowed snapshot computed from logs and the
//! session/history records persisted by [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest cache footprint of the active conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Reporting convention: equals `cache_read_tokens`, which tracks the
    /// live context size better than read + creation.
    pub total_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub message_count: usize,
    pub is_active: bool,
}

impl SessionSnapshot {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    pub last_update: DateTime<Utc>,
}

impl TokenUsage {
    pub fn new(current: u64, limit: u64, at: DateTime<Utc>) -> Self {
        Self {
            current,
            limit,
            remaining: limit.saturating_sub(current),
            last_update: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub description: String,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub percentage: f64,
}
