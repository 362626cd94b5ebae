//! Resolved runtime configuration.
//!
//! Values come from CLI flags first, then environment variables (both via
//! clap's `env` support in [`crate::cli::Args`]), then the defaults below.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::browser::default_chrome_install_paths;
use crate::cli::Args;
use crate::utils::parse_bool_env;

pub const APP_DIR_NAME: &str = ".claude-usage-monitor";
pub const HOME_ENV: &str = "CLAUDE_USAGE_MONITOR_HOME";
pub const DEV_MODE_ENV: &str = "CLAUDE_USAGE_MONITOR_DEV";

/// Default trailing window in which a log file still counts as active.
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TOKEN_LIMIT: u64 = 200_000;
pub const DEFAULT_HISTORY_RETENTION: usize = 500;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Remote service locations and the session cookie contract.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    pub base_url: String,
    pub usage_url: String,
    pub login_url: String,
    /// Lightweight authenticated endpoint used to prove a session is accepted.
    pub validation_url: String,
    pub cookie_name: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            base_url: "https://claude.ai".to_string(),
            usage_url: "https://claude.ai/settings/usage".to_string(),
            login_url: "https://claude.ai/login".to_string(),
            validation_url: "https://claude.ai/api/organizations".to_string(),
            cookie_name: "sessionKey".to_string(),
        }
    }
}

impl ServiceUrls {
    /// Host part of `base_url`, used for domain matching.
    pub fn domain(&self) -> Option<String> {
        url_host(&self.base_url)
    }
}

/// Lowercased host of an absolute URL; `None` when it has none.
pub fn url_host(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Comma-separated log root override (`CLAUDE_CONFIG_DIR`).
    pub claude_config_dir: Option<String>,
    /// Absolute workspace path; when set, only its project log directory is read.
    pub workspace: Option<PathBuf>,
    pub activity_window: Duration,
    pub token_limit: u64,

    pub profile_dir: PathBuf,
    pub state_dir: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Last-resort install locations checked after `CHROME_PATH` and `PATH`.
    pub chrome_install_paths: Vec<PathBuf>,
    /// Attach to an already running browser on this debugging port instead of launching.
    pub attach_port: Option<u16>,
    pub urls: ServiceUrls,

    pub navigation_timeout: Duration,
    pub cookie_probe_timeout: Duration,
    pub settle_delay: Duration,
    pub login_timeout: Duration,
    pub login_poll_interval: Duration,

    pub history_retention: usize,
    pub failure_threshold: u32,
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = app_home_dir();
        Self {
            claude_config_dir: None,
            workspace: None,
            activity_window: DEFAULT_ACTIVITY_WINDOW,
            token_limit: DEFAULT_TOKEN_LIMIT,
            profile_dir: home.join("browser-profile"),
            state_dir: home,
            headless: true,
            chrome_path: None,
            chrome_install_paths: default_chrome_install_paths(),
            attach_port: None,
            urls: ServiceUrls::default(),
            navigation_timeout: Duration::from_secs(30),
            cookie_probe_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            login_timeout: Duration::from_secs(300),
            login_poll_interval: Duration::from_secs(2),
            history_retention: DEFAULT_HISTORY_RETENTION,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            dev_mode: false,
        }
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        let mut cfg = Config {
            claude_config_dir: args.claude_config_dir.clone(),
            workspace: args.workspace.clone(),
            dev_mode: args.debug || parse_bool_env(DEV_MODE_ENV),
            ..Config::default()
        };
        if let Some(minutes) = args.activity_window_minutes {
            cfg.activity_window = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(limit) = args.token_limit {
            cfg.token_limit = limit;
        }
        if let Some(ref dir) = args.profile_dir {
            cfg.profile_dir = dir.clone();
        }
        cfg
    }
}

/// Directory for state this tool owns, kept outside any project so it survives reinstalls.
pub fn app_home_dir() -> PathBuf {
    if let Ok(custom) = env::var(HOME_ENV) {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    if let Some(b) = directories::BaseDirs::new() {
        return b.home_dir().join(APP_DIR_NAME);
    }
    PathBuf::from(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn domain_strips_scheme_and_path() {
        let urls = ServiceUrls::default();
        assert_eq!(urls.domain().as_deref(), Some("claude.ai"));

        let local = ServiceUrls {
            base_url: "http://127.0.0.1:8080/app".to_string(),
            ..ServiceUrls::default()
        };
        assert_eq!(local.domain().as_deref(), Some("127.0.0.1"));
        assert_eq!(url_host("https://claude.ai?x=1").as_deref(), Some("claude.ai"));
    }

    #[test]
    fn host_ignores_userinfo_and_case() {
        assert_eq!(
            url_host("https://user:pw@claude.ai/x").as_deref(),
            Some("claude.ai")
        );
        assert_eq!(
            url_host("https://CLAUDE.AI/settings").as_deref(),
            Some("claude.ai")
        );
        assert_eq!(url_host("http://[::1]:8080/").as_deref(), Some("[::1]"));
        assert_eq!(url_host("about:blank"), None);
        assert_eq!(url_host("not a url"), None);
    }

    #[test]
    fn browser_options_are_not_cli_flags() {
        use clap::Parser;
        let args = Args::try_parse_from(["claude-usage-monitor", "session"]).unwrap();
        let cfg = Config::from_args(&args);
        assert!(cfg.headless);
        assert!(cfg.attach_port.is_none());
        assert!(cfg.chrome_path.is_none());
        assert!(
            Args::try_parse_from(["claude-usage-monitor", "session", "--attach-port", "9222"])
                .is_err()
        );
    }

    #[test]
    #[serial]
    fn home_override_wins() {
        unsafe { env::set_var(HOME_ENV, "/tmp/cum-home") };
        assert_eq!(app_home_dir(), PathBuf::from("/tmp/cum-home"));
        let cfg = Config::default();
        assert_eq!(cfg.profile_dir, PathBuf::from("/tmp/cum-home/browser-profile"));
        unsafe { env::remove_var(HOME_ENV) };
    }
}
