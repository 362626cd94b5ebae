//! Scripted in-memory browser for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::{Value, json};

use claude_usage_monitor::browser::{
    Browser, BrowserLauncher, BrowserPage, Cookie, LaunchOptions, NetworkObserver,
    OutgoingRequest,
};
use claude_usage_monitor::config::Config;
use claude_usage_monitor::error::BrowserError;

pub const USAGE_API: &str = "https://claude.ai/api/organizations/org-1/usage";
pub const PREPAID_API: &str = "https://claude.ai/api/organizations/org-1/prepaid/credits";
pub const OVERAGE_API: &str = "https://claude.ai/api/organizations/org-1/overage_spend_limit";
pub const VALIDATION_API: &str = "https://claude.ai/api/organizations";

pub fn session_cookie(expires: Option<f64>) -> Cookie {
    Cookie {
        name: "sessionKey".to_string(),
        value: "sk-ant-sid01-test".to_string(),
        domain: ".claude.ai".to_string(),
        path: "/".to_string(),
        expires,
        http_only: true,
        secure: true,
    }
}

pub fn far_future() -> Option<f64> {
    Some(4_000_000_000.0)
}

pub fn ok_json(body: Value) -> Value {
    json!({ "ok": true, "status": 200, "body": body })
}

pub fn http_status(status: u16) -> Value {
    json!({ "ok": false, "status": status, "body": null })
}

pub fn fetch_threw() -> Value {
    json!({ "ok": false, "status": 0, "error": "TypeError: Failed to fetch" })
}

pub struct FakePage {
    url: Mutex<String>,
    cookies: Mutex<Vec<Cookie>>,
    text: Mutex<String>,
    fetch_responses: Mutex<HashMap<String, Value>>,
    requests_on_goto: Mutex<HashMap<String, Vec<String>>>,
    cookies_on_goto: Mutex<HashMap<String, Cookie>>,
    fail_navigation: AtomicBool,
    observers: Mutex<Vec<Arc<dyn NetworkObserver>>>,
    gotos: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new("about:blank".to_string()),
            cookies: Mutex::new(Vec::new()),
            text: Mutex::new(String::new()),
            fetch_responses: Mutex::new(HashMap::new()),
            requests_on_goto: Mutex::new(HashMap::new()),
            cookies_on_goto: Mutex::new(HashMap::new()),
            fail_navigation: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            gotos: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.cookies.lock().unwrap().push(cookie);
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap() = url.to_string();
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }

    /// Result returned by an in-page `fetch` of exactly `url`.
    pub fn on_fetch(&self, url: &str, response: Value) {
        self.fetch_responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Navigating to `page_url` makes the page issue a GET to `request_url`.
    pub fn emit_on_goto(&self, page_url: &str, request_url: &str) {
        self.requests_on_goto
            .lock()
            .unwrap()
            .entry(page_url.to_string())
            .or_default()
            .push(request_url.to_string());
    }

    /// Navigating to `page_url` sets `cookie`, as finishing a login would.
    pub fn cookie_on_goto(&self, page_url: &str, cookie: Cookie) {
        self.cookies_on_goto
            .lock()
            .unwrap()
            .insert(page_url.to_string(), cookie);
    }

    pub fn fail_navigation(&self) {
        self.fail_navigation.store(true, Ordering::SeqCst);
    }

    pub fn clear_observers(&self) {
        self.observers.lock().unwrap().clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub fn gotos(&self) -> Vec<String> {
        self.gotos.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn evaluation_count(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    pub fn fetch_scripts_for(&self, url: &str) -> Vec<String> {
        let quoted = format!("\"{url}\"");
        self.scripts()
            .into_iter()
            .filter(|s| s.contains("fetch(") && s.contains(&quoted))
            .collect()
    }

    fn cookie_jar(&self) -> Vec<Cookie> {
        self.cookies.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.gotos.lock().unwrap().push(url.to_string());
        if self.fail_navigation.load(Ordering::SeqCst) {
            return Err(BrowserError::Timeout(timeout));
        }
        self.set_url(url);
        if let Some(cookie) = self.cookies_on_goto.lock().unwrap().get(url).cloned() {
            self.add_cookie(cookie);
        }
        let requests = self
            .requests_on_goto
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default();
        let observers = self.observers.lock().unwrap().clone();
        for request_url in requests {
            let mut headers = BTreeMap::new();
            headers.insert("Accept".to_string(), "*/*".to_string());
            headers.insert("anthropic-client-platform".to_string(), "web_claude_ai".to_string());
            let request = OutgoingRequest {
                method: "GET".to_string(),
                url: request_url,
                headers,
            };
            for o in &observers {
                o.on_request(&request);
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self.cookie_jar())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        self.scripts.lock().unwrap().push(script.to_string());
        if script.contains("fetch(") {
            let responses = self.fetch_responses.lock().unwrap();
            let hit = responses
                .iter()
                .find(|(url, _)| script.contains(&format!("\"{url}\"")))
                .map(|(_, v)| v.clone());
            return Ok(hit.unwrap_or_else(fetch_threw));
        }
        Ok(Value::String(self.text.lock().unwrap().clone()))
    }

    async fn observe_network(
        &self,
        observer: Arc<dyn NetworkObserver>,
    ) -> Result<(), BrowserError> {
        self.observers.lock().unwrap().push(observer);
        Ok(())
    }
}

/// Every launch hands out the same page so tests can script it up front.
pub struct FakeBrowser {
    page: Arc<FakePage>,
    closed: Arc<AtomicUsize>,
    disconnected: Arc<AtomicUsize>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, BrowserError> {
        let page: Arc<dyn BrowserPage> = self.page.clone();
        Ok(page)
    }

    async fn all_cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self.page.cookie_jar())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrowserError> {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    pub page: Arc<FakePage>,
    launches: Mutex<Vec<LaunchOptions>>,
    connects: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
    disconnected: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(page: Arc<FakePage>) -> Arc<Self> {
        Arc::new(Self {
            page,
            launches: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
            disconnected: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.launches.lock().unwrap().clone()
    }

    /// WebSocket endpoints handed to `connect`, in order.
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn browser(&self) -> Box<dyn Browser> {
        Box::new(FakeBrowser {
            page: self.page.clone(),
            closed: self.closed.clone(),
            disconnected: self.disconnected.clone(),
        })
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>, BrowserError> {
        self.launches.lock().unwrap().push(options.clone());
        // A fresh browser process starts with fresh page hooks.
        self.page.clear_observers();
        Ok(self.browser())
    }

    async fn connect(&self, ws_endpoint: &str) -> Result<Box<dyn Browser>, BrowserError> {
        self.connects.lock().unwrap().push(ws_endpoint.to_string());
        self.page.clear_observers();
        Ok(self.browser())
    }
}

/// Answers `GET /json/version` like a browser started with
/// `--remote-debugging-port`. Returns the port it listens on.
pub fn serve_debugger_endpoint(ws_url: &str) -> u16 {
    use std::io::{BufRead, BufReader, Write};

    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let body = json!({ "Browser": "Chrome/130.0", "webSocketDebuggerUrl": ws_url }).to_string();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
        }
    });
    port
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Config pointing every path into `root`, with delays shrunk for tests.
pub fn test_config(root: &Path) -> Config {
    let chrome = root.join("fake-chrome");
    std::fs::write(&chrome, b"#!/bin/sh\n").unwrap();
    Config {
        profile_dir: root.join("profile"),
        state_dir: root.join("state"),
        chrome_path: Some(chrome),
        settle_delay: Duration::ZERO,
        navigation_timeout: Duration::from_millis(200),
        cookie_probe_timeout: Duration::from_millis(200),
        login_timeout: Duration::from_millis(150),
        login_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

/// Writes NDJSON lines to `path`, creating parent directories.
pub fn write_log(path: &Path, lines: &[Value]) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(path, body).unwrap();
    path.to_path_buf()
}

pub fn set_mtime(path: &Path, age: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

pub fn assistant_line(
    message_id: &str,
    request_id: &str,
    timestamp: &str,
    input: u64,
    output: u64,
    cache_creation: u64,
    cache_read: u64,
) -> Value {
    json!({
        "type": "assistant",
        "requestId": request_id,
        "timestamp": timestamp,
        "message": {
            "id": message_id,
            "model": "claude-sonnet-4-5",
            "usage": {
                "input_tokens": input,
                "output_tokens": output,
                "cache_creation_input_tokens": cache_creation,
                "cache_read_input_tokens": cache_read
            }
        }
    })
}

pub fn user_line(timestamp: &str) -> Value {
    json!({ "type": "user", "timestamp": timestamp, "message": { "role": "user", "content": "hi" } })
}
