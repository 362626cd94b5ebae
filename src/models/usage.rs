//! Remote usage record produced by one acquisition cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// Replayed the page's own internal API call.
    Api,
    /// Matched text in the rendered page.
    Html,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyCredits {
    pub used: f64,
    pub limit: f64,
    pub currency: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepaidCredits {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Five-hour utilization, the headline number.
    pub usage_percent: f64,
    /// Coarse human-relative time until the five-hour window resets.
    pub reset_time: String,
    pub five_hour: UsageWindow,
    pub seven_day: Option<UsageWindow>,
    pub seven_day_sonnet: Option<UsageWindow>,
    pub seven_day_opus: Option<UsageWindow>,
    pub extra_usage: Option<f64>,
    pub monthly_credits: Option<MonthlyCredits>,
    pub prepaid_credits: Option<PrepaidCredits>,
    pub source: UsageSource,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
}
