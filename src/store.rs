//! Persisted session and usage-history state.
//!
//! Both files are small JSON documents rewritten whole on every change.
//! They live in the tool's own home directory, never inside a project.
//! A missing or unparsable file loads as empty state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{SessionSnapshot, SessionState, TokenUsage, UsageHistoryEntry, UsageRecord};

pub const SESSIONS_FILE: &str = "sessions.json";
pub const HISTORY_FILE: &str = "usage-history.json";
const AUTO_SESSION_DESCRIPTION: &str = "Auto-detected session";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsFile {
    #[serde(default)]
    pub sessions: Vec<SessionState>,
    #[serde(default)]
    pub current_session_id: Option<String>,
}

impl SessionsFile {
    fn current_mut(&mut self) -> Option<&mut SessionState> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter_mut().find(|s| s.session_id == id)
    }

    fn current(&self) -> Option<&SessionState> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.session_id == id)
    }

    /// `YYYY-MM-DD-session-N`, one past the highest ordinal used that day.
    fn next_session_id(&self, now: DateTime<Utc>) -> String {
        let prefix = format!("{}-session-", now.format("%Y-%m-%d"));
        let highest = self
            .sessions
            .iter()
            .filter_map(|s| s.session_id.strip_prefix(&prefix))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}{}", highest + 1)
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    history_retention: usize,
}

impl SessionStore {
    pub fn new(dir: PathBuf, history_retention: usize) -> Self {
        Self {
            dir,
            history_retention,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.state_dir.clone(), cfg.history_retention)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sessions_path(&self) -> PathBuf {
        self.dir.join(SESSIONS_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    async fn load_sessions(&self) -> SessionsFile {
        load_or_default(&self.sessions_path()).await
    }

    async fn save_sessions(&self, file: &SessionsFile) -> Result<()> {
        write_json(&self.sessions_path(), file).await
    }

    pub async fn start_new_session(&self, description: &str, limit: u64) -> Result<SessionState> {
        self.start_new_session_at(description, limit, Utc::now()).await
    }

    pub async fn start_new_session_at(
        &self,
        description: &str,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<SessionState> {
        let mut file = self.load_sessions().await;
        let session = SessionState {
            session_id: file.next_session_id(now),
            start_time: now,
            description: description.to_string(),
            token_usage: TokenUsage::new(0, limit, now),
        };
        file.current_session_id = Some(session.session_id.clone());
        file.sessions.push(session.clone());
        self.save_sessions(&file).await?;
        debug!(session_id = %session.session_id, "started session");
        Ok(session)
    }

    pub async fn current_session(&self) -> Option<SessionState> {
        self.load_sessions().await.current().cloned()
    }

    pub async fn sessions(&self) -> Vec<SessionState> {
        self.load_sessions().await.sessions
    }

    /// Updates the current session's counters. `None` when no session is current.
    pub async fn update_session_tokens(
        &self,
        current: u64,
        limit: u64,
    ) -> Result<Option<SessionState>> {
        let mut file = self.load_sessions().await;
        let Some(session) = file.current_mut() else {
            return Ok(None);
        };
        session.token_usage = TokenUsage::new(current, limit, Utc::now());
        let updated = session.clone();
        self.save_sessions(&file).await?;
        Ok(Some(updated))
    }

    /// Mirrors an active snapshot into the current session, creating one if
    /// none exists. Inactive snapshots leave the state untouched.
    pub async fn sync_with_snapshot(
        &self,
        snapshot: &SessionSnapshot,
        limit: u64,
    ) -> Result<Option<SessionState>> {
        if !snapshot.is_active {
            return Ok(self.current_session().await);
        }
        match self.current_session().await {
            Some(s) if s.token_usage.current == snapshot.total_tokens && s.token_usage.limit == limit => {
                Ok(Some(s))
            }
            Some(_) => self.update_session_tokens(snapshot.total_tokens, limit).await,
            None => {
                self.start_new_session(AUTO_SESSION_DESCRIPTION, limit).await?;
                self.update_session_tokens(snapshot.total_tokens, limit).await
            }
        }
    }

    /// Appends a snapshot, dropping the oldest entries beyond the retention cap.
    pub async fn append_history(&self, percentage: f64) -> Result<()> {
        self.append_history_at(percentage, Utc::now()).await
    }

    pub async fn append_history_at(&self, percentage: f64, at: DateTime<Utc>) -> Result<()> {
        let mut entries: Vec<UsageHistoryEntry> = load_or_default(&self.history_path()).await;
        entries.push(UsageHistoryEntry {
            timestamp: at,
            percentage,
        });
        if entries.len() > self.history_retention {
            let excess = entries.len() - self.history_retention;
            entries.drain(..excess);
        }
        write_json(&self.history_path(), &entries).await
    }

    /// History point for a successful remote fetch.
    pub async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        self.append_history_at(record.usage_percent, record.fetched_at)
            .await
    }

    pub async fn history(&self) -> Vec<UsageHistoryEntry> {
        load_or_default(&self.history_path()).await
    }
}

async fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "state file unreadable");
            }
            return T::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state file corrupt; starting empty");
            T::default()
        }
    }
}

/// Whole-file write through a sibling temp file and rename.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("Failed to serialize state")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
    Ok(())
}
