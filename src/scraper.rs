//! # Scraper Module
//!
//! Drives one browser through an acquisition cycle: launch (or attach),
//! make sure the profile is logged in, let the usage page issue its own
//! API calls, replay the captured ones and fall back to reading the page
//! text when replay is not possible.
//!
//! The browser is always released after [`UsageScraper::fetch`]; a launched
//! browser is closed, an attached one only disconnected.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::auth::{ClearOutcome, SessionAuthenticator, ValidationReason};
use crate::browser::{
    Browser, BrowserLauncher, BrowserPage, LaunchOptions, NetworkObserver, OutgoingRequest,
    allocate_debug_port, cookie_header, default_launch_args, find_chrome_executable, page_fetch,
    probe_debugger_endpoint,
};
use crate::context::MonitorContext;
use crate::error::{BrowserError, ScrapeError};
use crate::models::{CapturedEndpoint, CapturedRequest, EndpointKind, UsageRecord};
use crate::usage_api::{classify_endpoint, normalize, record_from_text};

/// Upper bound on remembered `(method, url)` pairs per page.
const MAX_OBSERVED: usize = 100;

/// Network capture for one page lifetime.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    pub observed: Vec<CapturedEndpoint>,
    pub usage: Option<CapturedRequest>,
    pub prepaid_credits: Option<CapturedRequest>,
    pub overage_spend_limit: Option<CapturedRequest>,
}

impl CaptureState {
    pub fn get(&self, kind: EndpointKind) -> Option<&CapturedRequest> {
        match kind {
            EndpointKind::Usage => self.usage.as_ref(),
            EndpointKind::PrepaidCredits => self.prepaid_credits.as_ref(),
            EndpointKind::OverageSpendLimit => self.overage_spend_limit.as_ref(),
        }
    }

    fn slot(&mut self, kind: EndpointKind) -> &mut Option<CapturedRequest> {
        match kind {
            EndpointKind::Usage => &mut self.usage,
            EndpointKind::PrepaidCredits => &mut self.prepaid_credits,
            EndpointKind::OverageSpendLimit => &mut self.overage_spend_limit,
        }
    }

    /// Records one outgoing request. Later matches replace earlier ones.
    pub fn record(&mut self, request: &OutgoingRequest) -> Option<EndpointKind> {
        let kind = classify_endpoint(&request.url);
        if (kind.is_some() || request.url.contains("/api/")) && self.observed.len() < MAX_OBSERVED
        {
            self.observed.push(CapturedEndpoint {
                method: request.method.clone(),
                url: request.url.clone(),
            });
        }
        let kind = kind?;
        let mut headers: std::collections::BTreeMap<String, String> = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        headers.insert("content-type".to_string(), "application/json".to_string());
        *self.slot(kind) = Some(CapturedRequest {
            url: request.url.clone(),
            headers,
        });
        Some(kind)
    }

    pub fn captured_kinds(&self) -> Vec<EndpointKind> {
        [
            EndpointKind::Usage,
            EndpointKind::PrepaidCredits,
            EndpointKind::OverageSpendLimit,
        ]
        .into_iter()
        .filter(|k| self.get(*k).is_some())
        .collect()
    }
}

/// Feeds page requests into the shared [`CaptureState`].
struct CaptureObserver {
    state: Arc<Mutex<CaptureState>>,
}

impl NetworkObserver for CaptureObserver {
    fn on_request(&self, request: &OutgoingRequest) {
        let mut state = lock(&self.state);
        if let Some(kind) = state.record(request) {
            debug!(endpoint = kind.as_str(), url = %request.url, "captured internal API call");
        }
    }
}

fn lock(state: &Mutex<CaptureState>) -> MutexGuard<'_, CaptureState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Launched,
    Attached,
}

/// Read-only view of the scraper's current capture and connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ScraperDiagnostics {
    pub connection: Option<ConnectionKind>,
    pub debugging_port: Option<u16>,
    pub interception_installed: bool,
    pub captured: Vec<EndpointKind>,
    pub observed: Vec<CapturedEndpoint>,
    pub usage_url: Option<String>,
}

pub struct UsageScraper {
    ctx: Arc<MonitorContext>,
    launcher: Arc<dyn BrowserLauncher>,
    auth: SessionAuthenticator,
    browser: Option<Box<dyn Browser>>,
    page: Option<Arc<dyn BrowserPage>>,
    connection: Option<ConnectionKind>,
    debugging_port: Option<u16>,
    capture: Arc<Mutex<CaptureState>>,
    interception_installed: bool,
}

impl UsageScraper {
    pub fn new(ctx: Arc<MonitorContext>, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let auth = SessionAuthenticator::from_config(ctx.config());
        Self {
            ctx,
            launcher,
            auth,
            browser: None,
            page: None,
            connection: None,
            debugging_port: None,
            capture: Arc::new(Mutex::new(CaptureState::default())),
            interception_installed: false,
        }
    }

    pub fn auth(&self) -> &SessionAuthenticator {
        &self.auth
    }

    pub fn is_initialized(&self) -> bool {
        self.page.is_some()
    }

    /// Starts (or attaches to) a browser and opens a page with interception
    /// installed. Any browser already held is released first.
    pub async fn initialize(&mut self, headless: bool) -> Result<(), ScrapeError> {
        if self.browser.is_some() {
            self.close().await;
        }
        self.reset_capture();

        let cfg = self.ctx.config();
        let mut attached = None;
        if let Some(port) = cfg.attach_port {
            match probe_debugger_endpoint(port, cfg.cookie_probe_timeout).await {
                Some(ws) => {
                    info!(port, "attaching to running browser");
                    attached = Some((self.launcher.connect(&ws).await?, port));
                }
                None => warn!(port, "no browser listening on debugging port; launching instead"),
            }
        }

        let (browser, port, kind) = match attached {
            Some((browser, port)) => (browser, port, ConnectionKind::Attached),
            None => {
                let executable = find_chrome_executable(
                    cfg.chrome_path.as_deref(),
                    &cfg.chrome_install_paths,
                )?;
                let port = allocate_debug_port()?;
                tokio::fs::create_dir_all(&cfg.profile_dir)
                    .await
                    .map_err(BrowserError::from)?;
                let options = LaunchOptions {
                    executable,
                    user_data_dir: cfg.profile_dir.clone(),
                    headless,
                    debugging_port: port,
                    args: default_launch_args(port),
                };
                debug!(?options, "launching browser");
                let browser = self.launcher.launch(&options).await?;
                (browser, port, ConnectionKind::Launched)
            }
        };
        self.ctx
            .debug()
            .log(format!("browser {kind:?} on port {port} (headless={headless})"));

        let page = match browser.new_page().await {
            Ok(p) => p,
            Err(e) => {
                release(browser.as_ref(), kind).await;
                return Err(e.into());
            }
        };
        let observer = Arc::new(CaptureObserver {
            state: Arc::clone(&self.capture),
        });
        if let Err(e) = page.observe_network(observer).await {
            release(browser.as_ref(), kind).await;
            return Err(e.into());
        }

        self.browser = Some(browser);
        self.page = Some(page);
        self.connection = Some(kind);
        self.debugging_port = Some(port);
        self.interception_installed = true;
        Ok(())
    }

    /// Releases the browser. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.page = None;
        self.interception_installed = false;
        let kind = self.connection.take();
        self.debugging_port = None;
        if let Some(browser) = self.browser.take() {
            release(browser.as_ref(), kind.unwrap_or(ConnectionKind::Launched)).await;
        }
    }

    pub fn reset_capture(&self) {
        *lock(&self.capture) = CaptureState::default();
    }

    pub fn diagnostics(&self) -> ScraperDiagnostics {
        let state = lock(&self.capture);
        ScraperDiagnostics {
            connection: self.connection,
            debugging_port: self.debugging_port,
            interception_installed: self.interception_installed,
            captured: state.captured_kinds(),
            observed: state.observed.clone(),
            usage_url: state.usage.as_ref().map(|r| r.url.clone()),
        }
    }

    fn page(&self) -> Result<Arc<dyn BrowserPage>, ScrapeError> {
        self.page.clone().ok_or(ScrapeError::NotInitialized)
    }

    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        let page = self.page()?;
        page.goto(url, self.ctx.config().navigation_timeout)
            .await
            .map_err(|e| ScrapeError::from_navigation(url, e))
    }

    /// Leaves the page on the usage surface with a valid session, running the
    /// interactive login flow first when needed.
    pub async fn ensure_logged_in(&mut self) -> Result<(), ScrapeError> {
        let page = self.page()?;
        let validation = self.auth.validate_session(page.as_ref()).await;
        let usage_url = self.ctx.config().urls.usage_url.clone();
        if validation.valid {
            return self.navigate(&usage_url).await;
        }

        info!(reason = validation.reason.as_str(), "session not valid; starting login");
        self.ctx
            .debug()
            .log(format!("login required: {}", validation.reason.as_str()));
        // A cookie the server just refused must not count as a fresh login.
        let rejected = validation.reason == ValidationReason::ServerRejected;
        self.run_login(rejected).await?;
        let headless = self.ctx.config().headless;
        self.initialize(headless).await?;
        self.navigate(&usage_url).await
    }

    async fn run_login(&mut self, ignore_existing_cookie: bool) -> Result<(), ScrapeError> {
        self.initialize(false).await?;
        let stale = if ignore_existing_cookie {
            let browser = self.browser.as_deref().ok_or(ScrapeError::NotInitialized)?;
            self.auth.session_cookie_value(browser).await
        } else {
            None
        };
        let login_url = self.ctx.config().urls.login_url.clone();
        self.navigate(&login_url).await?;

        let cfg = self.ctx.config();
        let browser = self.browser.as_deref().ok_or(ScrapeError::NotInitialized)?;
        let logged_in = self
            .auth
            .wait_for_login(
                browser,
                cfg.login_timeout,
                cfg.login_poll_interval,
                stale.as_deref(),
            )
            .await;
        if !logged_in {
            let timeout = cfg.login_timeout;
            self.close().await;
            return Err(ScrapeError::LoginTimeout(timeout));
        }
        Ok(())
    }

    /// Opens a visible browser on the login page and waits for the user to sign in.
    pub async fn login(&mut self) -> Result<(), ScrapeError> {
        let result = self.run_login(false).await;
        self.close().await;
        result
    }

    async fn replay(
        &self,
        page: &dyn BrowserPage,
        request: &CapturedRequest,
    ) -> Result<Value, ScrapeError> {
        let mut headers = request.headers.clone();
        let cookies = page.cookies().await?;
        if !cookies.is_empty() {
            headers.insert("cookie".to_string(), cookie_header(&cookies));
        }
        let resp = page_fetch(page, &request.url, &headers).await?;
        if let Some(err) = resp.error {
            return Err(ScrapeError::Payload(format!(
                "replay of {} failed: {err}",
                request.url
            )));
        }
        if !resp.ok {
            return Err(ScrapeError::Payload(format!(
                "replay of {} returned HTTP {}",
                request.url, resp.status
            )));
        }
        Ok(resp.body)
    }

    async fn replay_optional(
        &self,
        page: &dyn BrowserPage,
        request: Option<&CapturedRequest>,
    ) -> Option<Value> {
        let request = request?;
        match self.replay(page, request).await {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(url = %request.url, error = %e, "secondary endpoint unavailable");
                None
            }
        }
    }

    async fn fetch_from_api(
        &self,
        page: &dyn BrowserPage,
        capture: &CaptureState,
    ) -> Result<UsageRecord, ScrapeError> {
        let usage_req = capture.usage.as_ref().ok_or_else(|| {
            ScrapeError::Payload("usage endpoint was not captured".to_string())
        })?;
        let usage = self.replay(page, usage_req).await?;
        let prepaid = self
            .replay_optional(page, capture.prepaid_credits.as_ref())
            .await;
        let overage = self
            .replay_optional(page, capture.overage_spend_limit.as_ref())
            .await;
        normalize(usage, prepaid, overage, Utc::now())
    }

    /// Reads usage from a page already on the usage surface.
    pub async fn fetch_usage_data(&self) -> Result<UsageRecord, ScrapeError> {
        let page = self.page()?;
        tokio::time::sleep(self.ctx.config().settle_delay).await;

        let capture = lock(&self.capture).clone();
        match self.fetch_from_api(page.as_ref(), &capture).await {
            Ok(record) => return Ok(record),
            Err(e) => {
                debug!(error = %e, "API replay unavailable; reading page text");
                self.ctx.debug().log(format!("falling back to page text: {e}"));
            }
        }

        let text = page.text_content().await?;
        record_from_text(&text, Utc::now())
    }

    async fn fetch_cycle(&mut self) -> Result<UsageRecord, ScrapeError> {
        let headless = self.ctx.config().headless;
        self.initialize(headless).await?;
        self.ensure_logged_in().await?;
        self.fetch_usage_data().await
    }

    /// One full acquisition cycle. The browser is released whatever the outcome.
    pub async fn fetch(&mut self) -> Result<UsageRecord, ScrapeError> {
        let result = self.fetch_cycle().await;
        self.close().await;
        if let Err(ref e) = result {
            warn!(error = %e, retryable = e.is_retryable(), "usage fetch failed");
        }
        result
    }

    /// Releases any held browser, then deletes the stored profile.
    pub async fn clear_session(&mut self) -> ClearOutcome {
        self.close().await;
        self.reset_capture();
        self.auth.clear_session().await
    }
}

async fn release(browser: &dyn Browser, kind: ConnectionKind) {
    let result = match kind {
        ConnectionKind::Launched => browser.close().await,
        ConnectionKind::Attached => browser.disconnect().await,
    };
    if let Err(e) = result {
        warn!(error = %e, ?kind, "failed to release browser");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(url: &str) -> OutgoingRequest {
        let mut headers = BTreeMap::new();
        headers.insert("Anthropic-Client-Platform".to_string(), "web".to_string());
        OutgoingRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers,
        }
    }

    #[test]
    fn capture_forces_json_content_type_and_last_write_wins() {
        let mut state = CaptureState::default();
        assert_eq!(
            state.record(&request("https://claude.ai/api/organizations/a/usage")),
            Some(EndpointKind::Usage)
        );
        state.record(&request("https://claude.ai/api/organizations/b/usage"));

        let usage = state.usage.as_ref().unwrap();
        assert_eq!(usage.url, "https://claude.ai/api/organizations/b/usage");
        assert_eq!(usage.headers["content-type"], "application/json");
        assert_eq!(usage.headers["anthropic-client-platform"], "web");
        assert_eq!(state.captured_kinds(), vec![EndpointKind::Usage]);
        assert_eq!(state.observed.len(), 2);
    }

    #[test]
    fn unrelated_requests_are_not_captured() {
        let mut state = CaptureState::default();
        assert_eq!(state.record(&request("https://claude.ai/_next/static/app.js")), None);
        assert_eq!(state.record(&request("https://claude.ai/api/bootstrap")), None);
        assert!(state.usage.is_none());
        assert_eq!(state.observed.len(), 1);
    }
}
