use chrono::{DateTime, Utc};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";
pub const PROJECTS_DIR: &str = "projects";

/// Candidate log roots in priority order: each entry of the comma-separated
/// override, then `~/.config/claude/projects`, then `~/.claude/projects`.
pub fn candidate_log_roots(override_env: Option<&str>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = vec![];
    if let Some(list) = override_env {
        for p in list.split(',') {
            let p = p.trim();
            if p.is_empty() {
                continue;
            }
            roots.push(PathBuf::from(p).join(PROJECTS_DIR));
        }
    }
    if let Some(home) = home {
        roots.push(home.join(".config").join("claude").join(PROJECTS_DIR));
        roots.push(home.join(".claude").join(PROJECTS_DIR));
    }
    roots
}

/// First candidate root that exists as a directory. Never creates anything.
pub fn locate_log_root(override_env: Option<&str>) -> Option<PathBuf> {
    let basedirs = directories::BaseDirs::new();
    let home = basedirs.as_ref().map(|b| b.home_dir().to_path_buf());
    candidate_log_roots(override_env, home.as_deref())
        .into_iter()
        .find(|p| p.is_dir())
}

/// Directory name the CLI uses for a workspace: path separators become `-`.
pub fn project_dir_name(workspace: &Path) -> String {
    workspace
        .to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.1}B", n as f64 / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

pub fn format_path(p: &str) -> String {
    if let Some(b) = directories::BaseDirs::new() {
        let home_s = b.home_dir().to_string_lossy();
        if p.starts_with(&*home_s) {
            return format!("~{}", &p[home_s.len()..]);
        }
    }
    p.to_owned()
}

/// Coarse time-until display: `2d 5h`, `3h 12m` or `45m`. Informational only.
pub fn format_time_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total_minutes = (reset_at - now).num_minutes();
    if total_minutes <= 0 {
        return "Resetting soon".to_string();
    }
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn parse_bool_env(var: &str) -> bool {
    match env::var(var) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
