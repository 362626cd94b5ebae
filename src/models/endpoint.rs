use std::collections::BTreeMap;

use serde::Serialize;

/// The internal API calls worth replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Usage,
    PrepaidCredits,
    OverageSpendLimit,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::PrepaidCredits => "prepaid_credits",
            Self::OverageSpendLimit => "overage_spend_limit",
        }
    }
}

/// A `(method, url)` pair seen on the network during a page's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedEndpoint {
    pub method: String,
    pub url: String,
}

/// A distinguished endpoint retained for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}
