use chrono::{DateTime, Local, Utc};
use serde_json::json;
use std::path::Path;

#[cfg(feature = "colors")]
use owo_colors::OwoColorize;

// Provide a no-op color shim when "colors" feature is disabled
#[cfg(not(feature = "colors"))]
pub mod color_shim {
    use std::fmt::{self, Display, Formatter};

    #[derive(Clone)]
    pub struct Plain(pub String);

    impl Display for Plain {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    pub trait ColorizeShim {
        fn as_str(&self) -> &str;

        fn bright_black(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn red(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn yellow(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn green(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bold(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn dimmed(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
    }

    impl ColorizeShim for &str {
        fn as_str(&self) -> &str {
            self
        }
    }
    impl ColorizeShim for String {
        fn as_str(&self) -> &str {
            self.as_str()
        }
    }
    impl ColorizeShim for Plain {
        fn as_str(&self) -> &str {
            &self.0
        }
    }
}

#[cfg(not(feature = "colors"))]
use color_shim::ColorizeShim as OwoColorize;

use crate::auth::SessionStatus;
use crate::models::{SessionSnapshot, SessionState, UsageHistoryEntry, UsageTotals};
use crate::reconcile::session_percent;
use crate::utils::{format_path, format_tokens};

fn colorize_percent(pct: f64) -> String {
    if pct >= 95.0 {
        format!("{pct:.1}%").red().bold().to_string()
    } else if pct >= 80.0 {
        format!("{pct:.1}%").yellow().bold().to_string()
    } else {
        format!("{pct:.1}%").green().to_string()
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub fn print_snapshot(
    snapshot: &SessionSnapshot,
    token_limit: u64,
    workspace: Option<&Path>,
    json: bool,
) {
    let pct = session_percent(snapshot.total_tokens, token_limit);
    if json {
        print_json(&json!({
            "snapshot": snapshot,
            "token_limit": token_limit,
            "session_percent": pct,
            "workspace": workspace.map(|p| p.display().to_string()),
        }));
        return;
    }
    if let Some(ws) = workspace {
        println!("{}", format_path(&ws.to_string_lossy()).cyan());
    }
    if !snapshot.is_active {
        println!("{}", "No active session".dimmed());
        return;
    }
    println!(
        "{} {} / {} ({})",
        "Session".bold(),
        format_tokens(snapshot.total_tokens),
        format_tokens(token_limit),
        colorize_percent(pct)
    );
    println!(
        "  {} {}  {} {}  {} {}",
        "read".bright_black(),
        format_tokens(snapshot.cache_read_tokens),
        "created".bright_black(),
        format_tokens(snapshot.cache_creation_tokens),
        "messages".bright_black(),
        snapshot.message_count
    );
}

pub fn print_totals(totals: &UsageTotals, since: Option<DateTime<Utc>>, json: bool) {
    if json {
        print_json(&json!({
            "since": since.map(|d| d.to_rfc3339()),
            "input_tokens": totals.input_tokens,
            "output_tokens": totals.output_tokens,
            "cache_creation_tokens": totals.cache_creation_tokens,
            "cache_read_tokens": totals.cache_read_tokens,
            "total_tokens": totals.total_tokens(),
            "event_count": totals.event_count,
        }));
        return;
    }
    if let Some(since) = since {
        println!(
            "{} {}",
            "Since".bright_black(),
            since.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    println!(
        "{} {} ({} events)",
        "Total".bold(),
        format_tokens(totals.total_tokens()),
        totals.event_count
    );
    println!(
        "  {} {}  {} {}  {} {}  {} {}",
        "in".bright_black(),
        format_tokens(totals.input_tokens),
        "out".bright_black(),
        format_tokens(totals.output_tokens),
        "cache+".bright_black(),
        format_tokens(totals.cache_creation_tokens),
        "cache".bright_black(),
        format_tokens(totals.cache_read_tokens)
    );
}

/// Offline view of the profile: stored cookies can only be validated by a browser.
pub fn print_auth_status(has_stored_session: bool, profile_dir: &Path, json: bool) {
    if json {
        print_json(&json!({
            "has_stored_session": has_stored_session,
            "status": if has_stored_session { None } else { Some(SessionStatus::NoSession) },
            "profile_dir": profile_dir.display().to_string(),
        }));
        return;
    }
    let label = if has_stored_session {
        "stored session".green().to_string()
    } else {
        "no session".yellow().to_string()
    };
    println!(
        "{} {} {}",
        "Session:".bold(),
        label,
        format_path(&profile_dir.to_string_lossy()).bright_black()
    );
}

pub fn print_history(entries: &[UsageHistoryEntry], json: bool) {
    if json {
        print_json(&json!(entries));
        return;
    }
    if entries.is_empty() {
        println!("{}", "No usage history yet".dimmed());
        return;
    }
    for e in entries {
        println!(
            "{}  {}",
            e.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            colorize_percent(e.percentage)
        );
    }
}

pub fn print_session_state(session: &SessionState, json: bool) {
    if json {
        print_json(&json!(session));
        return;
    }
    println!(
        "{} {} {}",
        "Started".bold(),
        session.session_id.cyan(),
        session.description.bright_black()
    );
}

pub fn print_message(success: bool, message: &str, json: bool) {
    if json {
        print_json(&json!({ "success": success, "message": message }));
    } else if success {
        println!("{}", message.green());
    } else {
        println!("{}", message.red());
    }
}
