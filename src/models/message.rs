use serde::Deserialize;
use serde_json::Value;

use crate::models::entry::LocalUsageEvent;
use crate::utils::parse_timestamp;

/// Model name the CLI writes for locally generated (non-billed) messages.
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct MessageUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

impl MessageUsage {
    pub fn cache_total(&self) -> u64 {
        self.cache_creation_input_tokens
            .unwrap_or(0)
            .saturating_add(self.cache_read_input_tokens.unwrap_or(0))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct MessageObj {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<MessageUsage>,
}

/// One line of a session log, as loosely as the external writer produces it.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct TranscriptLine {
    pub r#type: Option<String>,
    pub message: Option<MessageObj>,
    pub timestamp: Option<String>,
    #[serde(rename = "requestId", alias = "request_id")]
    pub request_id: Option<String>,
    #[serde(rename = "isApiErrorMessage")]
    pub is_api_error_message: Option<Value>,
}

impl TranscriptLine {
    pub fn is_assistant(&self) -> bool {
        self.r#type.as_deref() == Some("assistant")
    }

    pub fn usage(&self) -> Option<&MessageUsage> {
        self.message.as_ref().and_then(|m| m.usage.as_ref())
    }

    fn has_error_flag(&self) -> bool {
        match &self.is_api_error_message {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Validity predicate: input/output token counts are present, the model
    /// is not the synthetic sentinel and the error flag is not set.
    pub fn is_valid_usage(&self) -> bool {
        if self.has_error_flag() {
            return false;
        }
        let Some(message) = self.message.as_ref() else {
            return false;
        };
        if message.model.as_deref() == Some(SYNTHETIC_MODEL) {
            return false;
        }
        message
            .usage
            .as_ref()
            .is_some_and(|u| u.input_tokens.is_some() && u.output_tokens.is_some())
    }

    pub fn into_event(self) -> Option<LocalUsageEvent> {
        if !self.is_valid_usage() {
            return None;
        }
        let message = self.message?;
        let usage = message.usage?;
        let input_tokens = usage.input_tokens?;
        let output_tokens = usage.output_tokens?;
        Some(LocalUsageEvent {
            message_id: message.id,
            request_id: self.request_id,
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
            event_type: self.r#type,
            input_tokens,
            output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            model: message.model,
        })
    }
}
