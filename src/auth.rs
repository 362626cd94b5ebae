//! # Auth Module
//!
//! Decides whether the browser profile holds an authenticated session.
//!
//! Validation is two-phase: a local cookie check first (no network beyond a
//! minimal domain visit), then one credentialed API call from inside the
//! page only when the cookie looks usable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserPage, Cookie, page_fetch};
use crate::config::{Config, ServiceUrls, url_host};

/// Cookie databases Chrome keeps inside a profile, relative to its root.
pub const COOKIE_STORE_FILES: &[&str] = &["Default/Cookies", "Default/Network/Cookies"];

#[derive(Debug, Clone, PartialEq)]
pub struct CookieCheck {
    pub exists: bool,
    pub expired: bool,
    pub cookie: Option<Cookie>,
}

impl CookieCheck {
    fn missing() -> Self {
        Self {
            exists: false,
            expired: true,
            cookie: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Valid,
    NoCookie,
    CookieExpired,
    ServerRejected,
    ValidationError,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::NoCookie => "no_cookie",
            Self::CookieExpired => "cookie_expired",
            Self::ServerRejected => "server_rejected",
            Self::ValidationError => "validation_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub reason: ValidationReason,
}

impl SessionValidation {
    fn with(reason: ValidationReason) -> Self {
        Self {
            valid: reason == ValidationReason::Valid,
            reason,
        }
    }
}

/// `NO_SESSION → VALID ⇄ INVALID`; clearing the profile returns to `NoSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NoSession,
    Valid,
    Invalid,
}

impl SessionStatus {
    pub fn from_validation(has_stored_session: bool, validation: &SessionValidation) -> Self {
        if validation.valid {
            SessionStatus::Valid
        } else if !has_stored_session && validation.reason == ValidationReason::NoCookie {
            SessionStatus::NoSession
        } else {
            SessionStatus::Invalid
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    profile_dir: PathBuf,
    urls: ServiceUrls,
    probe_timeout: Duration,
}

impl SessionAuthenticator {
    pub fn new(profile_dir: PathBuf, urls: ServiceUrls, probe_timeout: Duration) -> Self {
        Self {
            profile_dir,
            urls,
            probe_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.profile_dir.clone(),
            cfg.urls.clone(),
            cfg.cookie_probe_timeout,
        )
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Profile directory exists and holds a non-empty cookie store. No network.
    pub async fn has_stored_session(&self) -> bool {
        match tokio::fs::metadata(&self.profile_dir).await {
            Ok(m) if m.is_dir() => {}
            _ => return false,
        }
        for rel in COOKIE_STORE_FILES {
            if let Ok(m) = tokio::fs::metadata(self.profile_dir.join(rel)).await {
                if m.is_file() && m.len() > 0 {
                    return true;
                }
            }
        }
        false
    }

    pub async fn check_local_cookie(&self, page: &dyn BrowserPage) -> CookieCheck {
        self.check_local_cookie_at(page, Utc::now()).await
    }

    /// Reads the session cookie, visiting the base URL once if the page is
    /// elsewhere so the domain's cookies become visible. Fails closed.
    pub async fn check_local_cookie_at(
        &self,
        page: &dyn BrowserPage,
        now: DateTime<Utc>,
    ) -> CookieCheck {
        let Some(domain) = self.urls.domain() else {
            warn!(base_url = %self.urls.base_url, "base URL has no host");
            return CookieCheck::missing();
        };
        let on_domain = match page.current_url().await {
            Ok(url) => url_host(&url).is_some_and(|host| host_matches(&host, &domain)),
            Err(_) => false,
        };
        if !on_domain {
            if let Err(e) = page.goto(&self.urls.base_url, self.probe_timeout).await {
                debug!(error = %e, "domain visit for cookie check failed");
                return CookieCheck::missing();
            }
        }
        let cookies = match page.cookies().await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "reading page cookies failed");
                return CookieCheck::missing();
            }
        };
        match cookies
            .into_iter()
            .find(|c| c.name == self.urls.cookie_name && c.matches_domain(&domain))
        {
            Some(cookie) => CookieCheck {
                exists: true,
                expired: cookie.is_expired_at(now),
                cookie: Some(cookie),
            },
            None => CookieCheck::missing(),
        }
    }

    pub async fn validate_session(&self, page: &dyn BrowserPage) -> SessionValidation {
        let local = self.check_local_cookie(page).await;
        if !local.exists {
            return SessionValidation::with(ValidationReason::NoCookie);
        }
        if local.expired {
            return SessionValidation::with(ValidationReason::CookieExpired);
        }

        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        let reason = match page_fetch(page, &self.urls.validation_url, &headers).await {
            Ok(resp) if resp.error.is_some() => {
                debug!(error = ?resp.error, "in-page validation fetch threw");
                ValidationReason::ValidationError
            }
            Ok(resp) if resp.ok => ValidationReason::Valid,
            Ok(resp) => {
                info!(status = resp.status, "session rejected by server");
                ValidationReason::ServerRejected
            }
            Err(e) => {
                warn!(error = %e, "session validation failed");
                ValidationReason::ValidationError
            }
        };
        SessionValidation::with(reason)
    }

    /// Value of the session cookie currently in the browser's jar, if any.
    pub async fn session_cookie_value(&self, browser: &dyn Browser) -> Option<String> {
        let domain = self.urls.domain()?;
        browser
            .all_cookies()
            .await
            .ok()?
            .into_iter()
            .find(|c| c.name == self.urls.cookie_name && c.matches_domain(&domain))
            .map(|c| c.value)
    }

    /// Polls the cookie jar until an unexpired session cookie other than
    /// `stale` shows up. Never navigates, so a login flow in progress is
    /// left alone.
    pub async fn wait_for_login(
        &self,
        browser: &dyn Browser,
        max_wait: Duration,
        poll_interval: Duration,
        stale: Option<&str>,
    ) -> bool {
        let deadline = Instant::now() + max_wait;
        let Some(domain) = self.urls.domain() else {
            return false;
        };
        loop {
            if let Ok(cookies) = browser.all_cookies().await {
                let now = Utc::now();
                if cookies.iter().any(|c| {
                    c.name == self.urls.cookie_name
                        && c.matches_domain(&domain)
                        && !c.value.is_empty()
                        && !c.is_expired_at(now)
                        && stale != Some(c.value.as_str())
                }) {
                    info!("session cookie detected");
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Removes the whole profile directory. Idempotent; errors are reported, not raised.
    pub async fn clear_session(&self) -> ClearOutcome {
        match tokio::fs::remove_dir_all(&self.profile_dir).await {
            Ok(()) => ClearOutcome {
                success: true,
                message: "Session cleared".to_string(),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClearOutcome {
                success: true,
                message: "No session to clear".to_string(),
            },
            Err(e) => ClearOutcome {
                success: false,
                message: format!(
                    "Failed to clear session at {}: {e}",
                    self.profile_dir.display()
                ),
            },
        }
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}
