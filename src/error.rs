use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by a browser-automation backend.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser connection lost")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of one acquisition cycle.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Chrome/Chromium executable not found (searched: {})", format_searched(.searched))]
    ChromeNotFound { searched: Vec<PathBuf> },

    #[error("login was not completed within {0:?}")]
    LoginTimeout(Duration),

    #[error("page load timed out: {url}")]
    Timeout { url: String },

    #[error("could not find usage data on the page; the page layout may have changed")]
    LayoutChanged,

    #[error("no browser page is attached")]
    NotInitialized,

    #[error("unexpected usage payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

fn format_searched(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "PATH".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScrapeError {
    /// Wraps a navigation failure, promoting timeouts to the retryable variant.
    pub fn from_navigation(url: &str, err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout(_) => ScrapeError::Timeout {
                url: url.to_string(),
            },
            other => ScrapeError::Browser(other),
        }
    }

    /// Whether re-invoking the cycle later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::ChromeNotFound { .. } => false,
            ScrapeError::LayoutChanged => false,
            ScrapeError::Browser(BrowserError::Launch(_)) => false,
            _ => true,
        }
    }

    /// Message suitable for a notification shown to a human.
    pub fn user_message(&self) -> String {
        match self {
            ScrapeError::ChromeNotFound { .. } => {
                "Chrome or Chromium is required. Install it or set CHROME_PATH to its executable."
                    .to_string()
            }
            ScrapeError::LoginTimeout(_) => {
                "Login timed out. Run the login command again and finish signing in.".to_string()
            }
            ScrapeError::Timeout { .. } => {
                "The usage page took too long to load. Check your connection; it will be retried on the next refresh."
                    .to_string()
            }
            ScrapeError::LayoutChanged => {
                "Could not read usage from the page. The site layout may have changed.".to_string()
            }
            other => format!("Failed to fetch usage: {other}"),
        }
    }
}
