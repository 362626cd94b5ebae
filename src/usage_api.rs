//! # Usage API Module
//!
//! Turns the payloads of the usage page's internal API calls into a
//! [`UsageRecord`], and recognizes those calls on the wire.
//!
//! The service's response shape has changed between versions and plan
//! tiers, so extraction is table driven: each [`FieldSpec`] names a field
//! and the JSON paths it may live under, tried in order. Supporting a new
//! shape means adding a path, not a branch.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::error::ScrapeError;
use crate::models::{
    EndpointKind, MonthlyCredits, PrepaidCredits, UsageRecord, UsageSource, UsageWindow,
};
use crate::utils::{format_time_until, parse_timestamp};

pub const UNKNOWN_RESET: &str = "Unknown";

static USAGE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/api/organizations/[^/?#]+/usage(?:[/?#]|$)").unwrap());
static PREPAID_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/api/organizations/[^/?#]+/prepaid/credits(?:[/?#]|$)").unwrap());
static OVERAGE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/api/organizations/[^/?#]+/overage_spend_limit(?:[/?#]|$)").unwrap());

static PERCENT_USED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*used").unwrap());
static RESET_PHRASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)\bresets?\s+(?:in\s+|at\s+|on\s+)?([^\n]*\S)").unwrap());

/// Which internal endpoint a request URL belongs to, if any.
pub fn classify_endpoint(url: &str) -> Option<EndpointKind> {
    if USAGE_URL_RE.is_match(url) {
        Some(EndpointKind::Usage)
    } else if PREPAID_URL_RE.is_match(url) {
        Some(EndpointKind::PrepaidCredits)
    } else if OVERAGE_URL_RE.is_match(url) {
        Some(EndpointKind::OverageSpendLimit)
    } else {
        None
    }
}

/// One extractable field and the paths it has been seen under, newest shape first.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub paths: &'static [&'static [&'static str]],
}

const fn field(name: &'static str, paths: &'static [&'static [&'static str]]) -> FieldSpec {
    FieldSpec { name, paths }
}

pub const FIVE_HOUR_UTILIZATION: &str = "five_hour.utilization";
pub const FIVE_HOUR_RESETS_AT: &str = "five_hour.resets_at";
pub const SEVEN_DAY_UTILIZATION: &str = "seven_day.utilization";
pub const SEVEN_DAY_RESETS_AT: &str = "seven_day.resets_at";
pub const SONNET_UTILIZATION: &str = "seven_day_sonnet.utilization";
pub const SONNET_RESETS_AT: &str = "seven_day_sonnet.resets_at";
pub const OPUS_UTILIZATION: &str = "seven_day_opus.utilization";
pub const OPUS_RESETS_AT: &str = "seven_day_opus.resets_at";
pub const EXTRA_USAGE: &str = "extra_usage";

pub const USAGE_SCHEMA: &[FieldSpec] = &[
    field(FIVE_HOUR_UTILIZATION, &[&["five_hour", "utilization"]]),
    field(FIVE_HOUR_RESETS_AT, &[&["five_hour", "resets_at"]]),
    field(SEVEN_DAY_UTILIZATION, &[&["seven_day", "utilization"]]),
    field(SEVEN_DAY_RESETS_AT, &[&["seven_day", "resets_at"]]),
    field(SONNET_UTILIZATION, &[&["seven_day_sonnet", "utilization"]]),
    field(SONNET_RESETS_AT, &[&["seven_day_sonnet", "resets_at"]]),
    field(OPUS_UTILIZATION, &[&["seven_day_opus", "utilization"]]),
    field(OPUS_RESETS_AT, &[&["seven_day_opus", "resets_at"]]),
    field(EXTRA_USAGE, &[&["extra_usage", "utilization"], &["extra_usage"]]),
];

pub const CREDIT_LIMIT: &str = "monthly_credit_limit";
pub const CREDITS_USED: &str = "used_credits";
pub const CURRENCY: &str = "currency";
pub const PREPAID_AMOUNT: &str = "amount";

pub const OVERAGE_SCHEMA: &[FieldSpec] = &[
    field(CREDIT_LIMIT, &[&["monthly_credit_limit"], &["monthly_limit"]]),
    field(CREDITS_USED, &[&["used_credits"], &["used"]]),
    field(CURRENCY, &[&["currency"]]),
];

pub const PREPAID_SCHEMA: &[FieldSpec] = &[
    field(PREPAID_AMOUNT, &[&["amount"], &["balance"]]),
    field(CURRENCY, &[&["currency"]]),
];

/// Value at `path`, treating JSON `null` as absent.
pub fn extract<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = payload;
    for key in path {
        cur = cur.get(*key)?;
    }
    if cur.is_null() { None } else { Some(cur) }
}

/// Applies a schema to a payload; fields found under none of their paths are omitted.
pub fn extract_fields<'a>(
    payload: &'a Value,
    schema: &[FieldSpec],
) -> BTreeMap<&'static str, &'a Value> {
    let mut out = BTreeMap::new();
    for spec in schema {
        if let Some(v) = spec.paths.iter().find_map(|p| extract(payload, p)) {
            out.insert(spec.name, v);
        }
    }
    out
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(fields: &BTreeMap<&'static str, &Value>, name: &str) -> Option<f64> {
    fields.get(name).and_then(|v| as_f64(v))
}

fn timestamp(fields: &BTreeMap<&'static str, &Value>, name: &str) -> Option<DateTime<Utc>> {
    fields.get(name).and_then(|v| v.as_str()).and_then(parse_timestamp)
}

fn text(fields: &BTreeMap<&'static str, &Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(|v| v.as_str()).map(str::to_string)
}

fn window(
    fields: &BTreeMap<&'static str, &Value>,
    utilization: &str,
    resets_at: &str,
) -> Option<UsageWindow> {
    Some(UsageWindow {
        utilization: clamp_percent(number(fields, utilization)?),
        resets_at: timestamp(fields, resets_at),
    })
}

/// Utilization is a percentage; anything outside `[0, 100]` is pinned to the bound.
fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}

/// Amounts are reported in minor units (cents).
fn monthly_credits(payload: &Value) -> Option<MonthlyCredits> {
    let fields = extract_fields(payload, OVERAGE_SCHEMA);
    let limit = number(&fields, CREDIT_LIMIT)? / 100.0;
    let used = number(&fields, CREDITS_USED).unwrap_or(0.0) / 100.0;
    let percent = if limit > 0.0 { used / limit * 100.0 } else { 0.0 };
    Some(MonthlyCredits {
        used,
        limit,
        currency: text(&fields, CURRENCY).unwrap_or_else(|| "USD".to_string()),
        percent,
    })
}

fn prepaid_credits(payload: &Value) -> Option<PrepaidCredits> {
    let fields = extract_fields(payload, PREPAID_SCHEMA);
    Some(PrepaidCredits {
        amount: number(&fields, PREPAID_AMOUNT)? / 100.0,
        currency: text(&fields, CURRENCY).unwrap_or_else(|| "USD".to_string()),
    })
}

/// Builds a record from the usage payload plus the optional secondary payloads.
///
/// Only the five-hour utilization is required; every other field is plan
/// dependent and becomes `None` when absent.
pub fn normalize(
    usage: Value,
    prepaid: Option<Value>,
    overage: Option<Value>,
    now: DateTime<Utc>,
) -> Result<UsageRecord, ScrapeError> {
    let mut record = {
        let fields = extract_fields(&usage, USAGE_SCHEMA);
        let five_hour = window(&fields, FIVE_HOUR_UTILIZATION, FIVE_HOUR_RESETS_AT)
            .ok_or_else(|| ScrapeError::Payload(format!("missing {FIVE_HOUR_UTILIZATION}")))?;
        let reset_time = five_hour
            .resets_at
            .map(|at| format_time_until(at, now))
            .unwrap_or_else(|| UNKNOWN_RESET.to_string());
        UsageRecord {
            usage_percent: five_hour.utilization,
            reset_time,
            seven_day: window(&fields, SEVEN_DAY_UTILIZATION, SEVEN_DAY_RESETS_AT),
            seven_day_sonnet: window(&fields, SONNET_UTILIZATION, SONNET_RESETS_AT),
            seven_day_opus: window(&fields, OPUS_UTILIZATION, OPUS_RESETS_AT),
            extra_usage: number(&fields, EXTRA_USAGE),
            monthly_credits: overage.as_ref().and_then(monthly_credits),
            prepaid_credits: prepaid.as_ref().and_then(prepaid_credits),
            five_hour,
            source: UsageSource::Api,
            fetched_at: now,
            raw_payload: None,
        }
    };
    record.raw_payload = Some(json!({
        "usage": usage,
        "prepaid_credits": prepaid,
        "overage_spend_limit": overage,
    }));
    Ok(record)
}

/// Percentage-used and reset phrases found in rendered page text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUsage {
    pub percent: f64,
    pub reset_time: String,
}

pub fn parse_usage_text(text: &str) -> Option<TextUsage> {
    let percent = PERCENT_USED_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(clamp_percent)?;
    let reset_time = RESET_PHRASE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_RESET.to_string());
    Some(TextUsage {
        percent,
        reset_time,
    })
}

/// Fallback record from page text; no percentage means the page is not what we expect.
pub fn record_from_text(text: &str, now: DateTime<Utc>) -> Result<UsageRecord, ScrapeError> {
    let parsed = parse_usage_text(text).ok_or(ScrapeError::LayoutChanged)?;
    Ok(UsageRecord {
        usage_percent: parsed.percent,
        reset_time: parsed.reset_time,
        five_hour: UsageWindow {
            utilization: parsed.percent,
            resets_at: None,
        },
        seven_day: None,
        seven_day_sonnet: None,
        seven_day_opus: None,
        extra_usage: None,
        monthly_credits: None,
        prepaid_credits: None,
        source: UsageSource::Html,
        fetched_at: now,
        raw_payload: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2026-03-01T12:00:00Z").unwrap()
    }

    #[test]
    fn classifies_internal_endpoints() {
        let base = "https://claude.ai/api/organizations/0b7c-42";
        assert_eq!(
            classify_endpoint(&format!("{base}/usage")),
            Some(EndpointKind::Usage)
        );
        assert_eq!(
            classify_endpoint(&format!("{base}/usage?tz=UTC")),
            Some(EndpointKind::Usage)
        );
        assert_eq!(
            classify_endpoint(&format!("{base}/prepaid/credits")),
            Some(EndpointKind::PrepaidCredits)
        );
        assert_eq!(
            classify_endpoint(&format!("{base}/overage_spend_limit")),
            Some(EndpointKind::OverageSpendLimit)
        );
        assert_eq!(classify_endpoint(&format!("{base}/usage_stats")), None);
        assert_eq!(classify_endpoint("https://claude.ai/api/organizations"), None);
    }

    #[test]
    fn normalizes_full_payload() {
        let resets = (now() + TimeDelta::hours(3) + TimeDelta::minutes(12)).to_rfc3339();
        let usage = json!({
            "five_hour": {"utilization": 42.0, "resets_at": resets},
            "seven_day": {"utilization": 18, "resets_at": null},
            "seven_day_sonnet": null,
            "seven_day_opus": {"utilization": "7.5"},
            "extra_usage": {"utilization": 3.0}
        });
        let overage = json!({"monthly_credit_limit": 5000, "used_credits": 1250, "currency": "EUR"});
        let prepaid = json!({"amount": 2000});

        let rec = normalize(usage, Some(prepaid), Some(overage), now()).unwrap();
        assert_eq!(rec.usage_percent, 42.0);
        assert_eq!(rec.reset_time, "3h 12m");
        assert_eq!(rec.seven_day.as_ref().unwrap().utilization, 18.0);
        assert!(rec.seven_day.as_ref().unwrap().resets_at.is_none());
        assert!(rec.seven_day_sonnet.is_none());
        assert_eq!(rec.seven_day_opus.as_ref().unwrap().utilization, 7.5);
        assert_eq!(rec.extra_usage, Some(3.0));

        let credits = rec.monthly_credits.unwrap();
        assert_eq!(credits.limit, 50.0);
        assert_eq!(credits.used, 12.5);
        assert_eq!(credits.percent, 25.0);
        assert_eq!(credits.currency, "EUR");
        assert_eq!(rec.prepaid_credits.unwrap().amount, 20.0);
        assert_eq!(rec.source, UsageSource::Api);
        assert!(rec.raw_payload.unwrap().get("usage").is_some());
    }

    #[test]
    fn older_shape_extra_usage_as_plain_number() {
        let usage = json!({"five_hour": {"utilization": 1}, "extra_usage": 9});
        let rec = normalize(usage, None, None, now()).unwrap();
        assert_eq!(rec.extra_usage, Some(9.0));
        assert_eq!(rec.reset_time, UNKNOWN_RESET);
    }

    #[test]
    fn missing_five_hour_is_a_payload_error() {
        let err = normalize(json!({"seven_day": {"utilization": 1}}), None, None, now())
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Payload(_)));
    }

    #[test]
    fn text_without_reset_phrase_reports_unknown() {
        let parsed = parse_usage_text("Current session\n42% used\n").unwrap();
        assert_eq!(parsed.percent, 42.0);
        assert_eq!(parsed.reset_time, UNKNOWN_RESET);
    }

    #[test]
    fn text_with_reset_phrase() {
        let parsed = parse_usage_text("Resets in 2 hr 13 min\n17.5 % used").unwrap();
        assert_eq!(parsed.percent, 17.5);
        assert_eq!(parsed.reset_time, "2 hr 13 min");
    }

    #[test]
    fn utilization_is_pinned_to_percentage_range() {
        assert_eq!(parse_usage_text("150% used").unwrap().percent, 100.0);
        let rec = normalize(
            json!({
                "five_hour": { "utilization": 104.5 },
                "seven_day": { "utilization": -3 }
            }),
            None,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(rec.usage_percent, 100.0);
        assert_eq!(rec.five_hour.utilization, 100.0);
        assert_eq!(rec.seven_day.unwrap().utilization, 0.0);
    }

    #[test]
    fn text_without_percentage_means_layout_changed() {
        let err = record_from_text("Settings\nBilling", now()).unwrap_err();
        assert!(matches!(err, ScrapeError::LayoutChanged));
    }
}
