//! Merges remote usage results and local session snapshots into one view
//! model for a status line, keeping the last good remote record on failure.

use serde::Serialize;

use crate::config::Config;
use crate::error::ScrapeError;
use crate::models::{SessionSnapshot, UsageRecord};
use crate::utils::format_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Nothing fetched and nothing failed yet.
    NoData,
    Fresh,
    /// Last fetch failed; showing the previous record.
    Stale,
    /// Consecutive failures reached the threshold.
    Failing,
    /// Failed before any fetch ever succeeded.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub status: RemoteStatus,
    pub usage_percent: Option<f64>,
    pub reset_time: Option<String>,
    pub error: Option<String>,
    pub session_tokens: u64,
    pub session_percent: f64,
    pub session_active: bool,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self {
            status: RemoteStatus::NoData,
            usage_percent: None,
            reset_time: None,
            error: None,
            session_tokens: 0,
            session_percent: 0.0,
            session_active: false,
        }
    }
}

/// Share of `limit` used, rounded to one decimal.
pub fn session_percent(total_tokens: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    let pct = total_tokens as f64 / limit as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

#[derive(Debug, Clone)]
pub struct UsagePresenter {
    token_limit: u64,
    failure_threshold: u32,
    record: Option<UsageRecord>,
    snapshot: SessionSnapshot,
    consecutive_failures: u32,
    last_error: Option<String>,
    view: ViewModel,
}

impl UsagePresenter {
    pub fn new(token_limit: u64, failure_threshold: u32) -> Self {
        Self {
            token_limit,
            failure_threshold: failure_threshold.max(1),
            record: None,
            snapshot: SessionSnapshot::inactive(),
            consecutive_failures: 0,
            last_error: None,
            view: ViewModel::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.token_limit, cfg.failure_threshold)
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn record(&self) -> Option<&UsageRecord> {
        self.record.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns whether the view changed.
    pub fn apply_remote(&mut self, result: Result<UsageRecord, ScrapeError>) -> bool {
        match result {
            Ok(record) => {
                self.record = Some(record);
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_error = Some(e.user_message());
            }
        }
        self.refresh()
    }

    pub fn apply_local(&mut self, snapshot: SessionSnapshot) -> bool {
        self.snapshot = snapshot;
        self.refresh()
    }

    fn remote_status(&self) -> RemoteStatus {
        match (&self.record, self.consecutive_failures) {
            (None, 0) => RemoteStatus::NoData,
            (None, _) => RemoteStatus::Error,
            (Some(_), 0) => RemoteStatus::Fresh,
            (Some(_), n) if n >= self.failure_threshold => RemoteStatus::Failing,
            (Some(_), _) => RemoteStatus::Stale,
        }
    }

    fn refresh(&mut self) -> bool {
        let status = self.remote_status();
        let next = ViewModel {
            status,
            usage_percent: self.record.as_ref().map(|r| r.usage_percent),
            reset_time: self.record.as_ref().map(|r| r.reset_time.clone()),
            error: match status {
                RemoteStatus::Failing | RemoteStatus::Error => self.last_error.clone(),
                _ => None,
            },
            session_tokens: self.snapshot.total_tokens,
            session_percent: session_percent(self.snapshot.total_tokens, self.token_limit),
            session_active: self.snapshot.is_active,
        };
        if next == self.view {
            return false;
        }
        self.view = next;
        true
    }

    /// One-line rendering, e.g. `Claude: 42% · 5.0K tok (2.5%)`.
    pub fn status_text(&self) -> String {
        let v = &self.view;
        let mut out = match (v.status, v.usage_percent) {
            (RemoteStatus::Error, _) => "Claude: error".to_string(),
            (_, Some(pct)) => format!("Claude: {pct:.0}%"),
            (_, None) => "Claude: --".to_string(),
        };
        if v.status == RemoteStatus::Failing {
            out.push_str(" (!)");
        }
        if v.session_active {
            out.push_str(&format!(
                " · {} tok ({}%)",
                format_tokens(v.session_tokens),
                v.session_percent
            ));
        }
        out
    }
}
