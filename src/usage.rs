//! # Usage Module
//!
//! Reads the append-only JSONL session logs written by the Claude CLI.
//!
//! ## Key Functions
//!
//! - `enumerate_log_files` / `parse_log_file`: discovery and per-line parsing
//! - `aggregate`: deduplicated token totals, optionally since a timestamp
//! - `LocalUsageAggregator::current_session_snapshot`: cache footprint of the
//!   conversation that is active right now
//!
//! Nothing here returns an error past its boundary; unreadable inputs degrade
//! to empty or inactive results.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{LocalUsageEvent, SessionSnapshot, TranscriptLine, UsageTotals};
use crate::utils::{locate_log_root, project_dir_name};

pub const LOG_EXTENSION: &str = "jsonl";
/// Prefix of logs written by sub-agents; they track a narrower context.
pub const AGENT_FILE_PREFIX: &str = "agent-";

static SESSION_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\.jsonl$")
        .unwrap()
});

/// Recursive walk collecting `.jsonl` files, sorted lexically.
pub fn enumerate_log_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(LOG_EXTENSION))
        .collect();
    files.sort();
    files
}

/// A canonical UUID-named log that is not an agent log.
pub fn is_main_session_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with(AGENT_FILE_PREFIX) {
        return false;
    }
    SESSION_FILE_RE.is_match(name)
}

/// Parses every non-empty line independently; malformed or invalid lines are skipped.
pub fn parse_log_text(text: &str) -> Vec<LocalUsageEvent> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str::<TranscriptLine>(l).ok())
        .filter_map(TranscriptLine::into_event)
        .collect()
}

pub async fn parse_log_file(path: &Path) -> Vec<LocalUsageEvent> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => parse_log_text(&text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable log file");
            Vec::new()
        }
    }
}

/// Filters by `since`, drops repeated `(message_id, request_id)` keys keeping
/// the first occurrence, and sums the four token categories.
pub fn aggregate(events: &[LocalUsageEvent], since: Option<DateTime<Utc>>) -> UsageTotals {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut totals = UsageTotals::default();
    for e in events {
        if let Some(cutoff) = since {
            match e.timestamp {
                Some(ts) if ts >= cutoff => {}
                _ => continue,
            }
        }
        if let Some(key) = e.dedup_key() {
            if !seen.insert(key) {
                continue;
            }
        }
        totals.input_tokens = totals.input_tokens.saturating_add(e.input_tokens);
        totals.output_tokens = totals.output_tokens.saturating_add(e.output_tokens);
        totals.cache_creation_tokens = totals
            .cache_creation_tokens
            .saturating_add(e.cache_creation_tokens);
        totals.cache_read_tokens = totals.cache_read_tokens.saturating_add(e.cache_read_tokens);
        totals.event_count += 1;
    }
    totals
}

/// Scans from the last line backwards for the newest assistant event with
/// nonzero cache fields; stops at the first one found.
pub fn latest_cache_snapshot(text: &str) -> SessionSnapshot {
    let lines: Vec<TranscriptLine> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str::<TranscriptLine>(l).ok())
        .collect();
    let message_count = lines
        .iter()
        .filter(|l| l.is_assistant() && l.is_valid_usage())
        .count();

    for line in lines.iter().rev() {
        if !line.is_assistant() {
            continue;
        }
        let Some(usage) = line.usage() else {
            continue;
        };
        if usage.cache_total() == 0 {
            continue;
        }
        let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
        return SessionSnapshot {
            total_tokens: cache_read,
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: cache_read,
            message_count,
            is_active: cache_read > 0,
        };
    }
    SessionSnapshot::inactive()
}

/// Where a snapshot or totals query is allowed to look.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchScope {
    Dir(PathBuf),
    /// A workspace is set but its project directory does not exist.
    MissingProject,
    NoRoot,
}

#[derive(Debug, Clone)]
pub struct LocalUsageAggregator {
    log_root_override: Option<String>,
    workspace: Option<PathBuf>,
    activity_window: Duration,
}

impl LocalUsageAggregator {
    pub fn new(
        log_root_override: Option<String>,
        workspace: Option<PathBuf>,
        activity_window: Duration,
    ) -> Self {
        Self {
            log_root_override,
            workspace,
            activity_window,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.claude_config_dir.clone(),
            cfg.workspace.clone(),
            cfg.activity_window,
        )
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    pub fn set_workspace(&mut self, workspace: Option<PathBuf>) {
        self.workspace = workspace;
    }

    pub fn locate_log_root(&self) -> Option<PathBuf> {
        locate_log_root(self.log_root_override.as_deref())
    }

    /// The workspace's own log directory, or `None`. Never falls back to the root.
    pub fn locate_project_directory(&self, workspace: &Path) -> Option<PathBuf> {
        let root = self.locate_log_root()?;
        let dir = root.join(project_dir_name(workspace));
        if dir.is_dir() { Some(dir) } else { None }
    }

    fn search_scope(&self) -> SearchScope {
        match &self.workspace {
            Some(ws) => match self.locate_project_directory(ws) {
                Some(dir) => SearchScope::Dir(dir),
                None => SearchScope::MissingProject,
            },
            None => match self.locate_log_root() {
                Some(root) => SearchScope::Dir(root),
                None => SearchScope::NoRoot,
            },
        }
    }

    async fn list_files(dir: PathBuf) -> Vec<PathBuf> {
        tokio::task::spawn_blocking(move || enumerate_log_files(&dir))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "log enumeration task failed");
                Vec::new()
            })
    }

    /// Historical totals across every log in scope.
    pub async fn usage_totals(&self, since: Option<DateTime<Utc>>) -> UsageTotals {
        let dir = match self.search_scope() {
            SearchScope::Dir(d) => d,
            _ => return UsageTotals::default(),
        };
        let mut events = Vec::new();
        for path in Self::list_files(dir).await {
            events.extend(parse_log_file(&path).await);
        }
        aggregate(&events, since)
    }

    pub async fn current_session_snapshot(&self) -> SessionSnapshot {
        self.current_session_snapshot_at(SystemTime::now()).await
    }

    pub async fn current_session_snapshot_at(&self, now: SystemTime) -> SessionSnapshot {
        let dir = match self.search_scope() {
            SearchScope::Dir(d) => d,
            SearchScope::MissingProject => {
                debug!(
                    workspace = ?self.workspace,
                    "project log directory missing; reporting inactive"
                );
                return SessionSnapshot::inactive();
            }
            SearchScope::NoRoot => return SessionSnapshot::inactive(),
        };

        let cutoff = now.checked_sub(self.activity_window).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in Self::list_files(dir).await {
            if !is_main_session_file(&path) {
                continue;
            }
            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if modified < cutoff {
                continue;
            }
            if newest.as_ref().map(|(t, _)| modified >= *t).unwrap_or(true) {
                newest = Some((modified, path));
            }
        }

        let Some((_, path)) = newest else {
            return SessionSnapshot::inactive();
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => latest_cache_snapshot(&text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "session log unreadable");
                SessionSnapshot::inactive()
            }
        }
    }
}
