use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Cache footprint of the conversation active right now
    Session,
    /// Deduplicated token totals across all logs in scope
    Totals {
        /// Only count events at or after this RFC 3339 instant
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,
    },
    /// Whether the browser profile holds a stored session (no network)
    AuthStatus,
    /// Delete the browser profile and its stored session
    ClearSession,
    /// Recorded usage percentages, oldest first
    History,
    /// Start a new tracked session and make it current
    StartSession {
        description: String,
    },
}

#[derive(clap::Parser, Debug)]
#[command(name = "claude-usage-monitor", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Force Claude data path(s), comma-separated. Defaults to ~/.config/claude and ~/.claude
    #[arg(long, global = true, env = "CLAUDE_CONFIG_DIR")]
    pub claude_config_dir: Option<String>,

    /// Workspace whose project logs to read; without it the whole log root is used
    #[arg(long, global = true, env = "CLAUDE_USAGE_MONITOR_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Emit JSON instead of colored text
    #[arg(long, global = true)]
    pub json: bool,

    /// Minutes a session log stays "active" after its last write
    #[arg(long = "activity-window", global = true)]
    pub activity_window_minutes: Option<u64>,

    /// Token budget used for the session percentage
    #[arg(long, global = true, env = "CLAUDE_USAGE_MONITOR_TOKEN_LIMIT")]
    pub token_limit: Option<u64>,

    /// Browser profile directory (defaults to ~/.claude-usage-monitor/browser-profile)
    #[arg(long, global = true)]
    pub profile_dir: Option<PathBuf>,

    /// Debug mode: verbose logging and diagnostics
    #[arg(long, global = true, env = "CLAUDE_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn parse() -> Self {
        <Args as clap::Parser>::parse()
    }
}

fn parse_since(s: &str) -> Result<DateTime<Utc>, String> {
    crate::utils::parse_timestamp(s).ok_or_else(|| format!("not an RFC 3339 timestamp: {s}"))
}
