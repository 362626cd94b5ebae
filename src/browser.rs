//! # Browser Module
//!
//! The automation engine is an external capability. This module defines the
//! seam ([`BrowserLauncher`], [`Browser`], [`BrowserPage`]), the network
//! observer used for request interception, and the pieces of launching that
//! do not depend on a particular engine: executable discovery, debugging
//! port allocation and probing an already running instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{BrowserError, ScrapeError};

pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

const CHROME_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[cfg(target_os = "macos")]
const CHROME_FIXED_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
#[cfg(target_os = "windows")]
const CHROME_FIXED_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CHROME_FIXED_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Seconds since the epoch; `None` or negative for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires?;
        if secs < 0.0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
    }

    /// Expiry is inclusive: a cookie expiring exactly at `now` is expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(at) => at <= now,
            None => false,
        }
    }

    pub fn matches_domain(&self, domain: &str) -> bool {
        let d = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();
        d == domain || domain.ends_with(&format!(".{d}"))
    }
}

/// Serializes cookies as a `Cookie` request header value.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingResponse {
    pub url: String,
    pub status: u16,
}

/// Subscriber for a page's network traffic. Observation only: the backend
/// lets every request continue unmodified after notifying the observer.
pub trait NetworkObserver: Send + Sync {
    fn on_request(&self, request: &OutgoingRequest);

    fn on_response(&self, _response: &IncomingResponse) {}
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Cookies visible to the page's current document.
    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    /// Routes every subsequent request/response on this page through `observer`.
    async fn observe_network(&self, observer: Arc<dyn NetworkObserver>)
    -> Result<(), BrowserError>;

    async fn text_content(&self) -> Result<String, BrowserError> {
        let v = self
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, BrowserError>;

    /// The whole cookie jar, read without touching any page.
    async fn all_cookies(&self) -> Result<Vec<Cookie>, BrowserError>;

    /// Terminates a browser this process launched.
    async fn close(&self) -> Result<(), BrowserError>;

    /// Detaches from a browser someone else owns, leaving it running.
    async fn disconnect(&self) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub debugging_port: u16,
    pub args: Vec<String>,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>, BrowserError>;

    async fn connect(&self, ws_endpoint: &str) -> Result<Box<dyn Browser>, BrowserError>;
}

pub fn default_launch_args(port: u16) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={port}"),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
    ]
}

pub fn default_chrome_install_paths() -> Vec<PathBuf> {
    CHROME_FIXED_PATHS.iter().map(PathBuf::from).collect()
}

/// Locates a Chrome/Chromium binary: explicit path, `CHROME_PATH`, `PATH`
/// lookup, then `install_paths`.
pub fn find_chrome_executable(
    explicit: Option<&Path>,
    install_paths: &[PathBuf],
) -> Result<PathBuf, ScrapeError> {
    let env_path = env::var(CHROME_PATH_ENV).ok().map(PathBuf::from);
    find_chrome_in(explicit, env_path.as_deref(), CHROME_NAMES, install_paths)
}

fn find_chrome_in(
    explicit: Option<&Path>,
    env_path: Option<&Path>,
    names: &[&str],
    fixed: &[PathBuf],
) -> Result<PathBuf, ScrapeError> {
    let mut searched = Vec::new();
    for candidate in [explicit, env_path].into_iter().flatten() {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        searched.push(candidate.to_path_buf());
    }
    for name in names {
        if let Ok(found) = which::which(name) {
            return Ok(found);
        }
    }
    for path in fixed {
        if path.is_file() {
            return Ok(path.clone());
        }
        searched.push(path.clone());
    }
    Err(ScrapeError::ChromeNotFound { searched })
}

/// Asks the OS for a free local port so concurrent instances never collide.
pub fn allocate_debug_port() -> Result<u16, BrowserError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// WebSocket endpoint of a browser already listening on `port`, if any.
pub async fn probe_debugger_endpoint(port: u16, timeout: Duration) -> Option<String> {
    tokio::task::spawn_blocking(move || fetch_ws_endpoint(port, timeout))
        .await
        .ok()
        .flatten()
}

fn fetch_ws_endpoint(port: u16, timeout: Duration) -> Option<String> {
    // Loopback only; never route through an environment proxy.
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .proxy(None)
        .build();
    let agent: ureq::Agent = config.into();
    let url = format!("http://127.0.0.1:{port}/json/version");
    let mut response = match agent.get(&url).call() {
        Ok(r) => r,
        Err(e) => {
            debug!(port, error = %e, "no debugger listening");
            return None;
        }
    };
    let json: Value = response.body_mut().read_json().ok()?;
    json.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Result of a `fetch()` issued from inside the page.
#[derive(Debug, Clone, Deserialize)]
pub struct PageFetchResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Script performing a credentialed GET from the page's own origin.
pub fn page_fetch_script(url: &str, headers: &BTreeMap<String, String>) -> String {
    let url_js = Value::String(url.to_string());
    let headers_js = serde_json::to_value(headers).unwrap_or(Value::Null);
    format!(
        r#"(async () => {{
  try {{
    const r = await fetch({url_js}, {{ method: 'GET', headers: {headers_js}, credentials: 'include' }});
    const text = await r.text();
    let body = null;
    try {{ body = JSON.parse(text); }} catch (_) {{ body = text; }}
    return {{ ok: r.ok, status: r.status, body }};
  }} catch (e) {{
    return {{ ok: false, status: 0, error: String(e) }};
  }}
}})()"#
    )
}

pub async fn page_fetch(
    page: &dyn BrowserPage,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<PageFetchResponse, BrowserError> {
    let raw = page.evaluate(&page_fetch_script(url, headers)).await?;
    serde_json::from_value(raw).map_err(|e| BrowserError::Evaluation(e.to_string()))
}
