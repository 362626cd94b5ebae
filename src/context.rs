//! Explicitly constructed runtime context.
//!
//! Holds the resolved [`Config`], the development-mode flag and a debug
//! channel. Callers build one per process (or per test) and pass it down;
//! nothing here is process-global.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use crate::config::Config;

const DEBUG_CAPACITY: usize = 200;

/// Bounded ring of recent diagnostic lines, mirrored to `tracing`.
#[derive(Debug)]
pub struct DebugChannel {
    enabled: bool,
    lines: Mutex<VecDeque<String>>,
}

impl DebugChannel {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Mutex::new(VecDeque::with_capacity(DEBUG_CAPACITY)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(target: "claude_usage_monitor::debug", "{message}");
        if !self.enabled {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == DEBUG_CAPACITY {
                lines.pop_front();
            }
            lines.push_back(format!("[{}] {}", Utc::now().format("%H:%M:%S"), message));
        }
    }

    pub fn recent(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

#[derive(Debug)]
pub struct MonitorContext {
    config: Config,
    debug: DebugChannel,
}

impl MonitorContext {
    pub fn new(config: Config) -> Self {
        let debug = DebugChannel::new(config.dev_mode);
        Self { config, debug }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn debug(&self) -> &DebugChannel {
        &self.debug
    }

    pub fn dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    /// Drops buffered diagnostics. Call when the host deactivates.
    pub fn shutdown(&self) {
        self.debug.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_channel_keeps_nothing() {
        let ch = DebugChannel::new(false);
        ch.log("hello");
        assert!(ch.recent().is_empty());
    }

    #[test]
    fn ring_is_bounded_and_cleared_on_shutdown() {
        let ctx = MonitorContext::new(Config {
            dev_mode: true,
            ..Config::default()
        });
        for i in 0..(DEBUG_CAPACITY + 5) {
            ctx.debug().log(format!("line {i}"));
        }
        let recent = ctx.debug().recent();
        assert_eq!(recent.len(), DEBUG_CAPACITY);
        assert!(recent[0].ends_with("line 5"));
        ctx.shutdown();
        assert!(ctx.debug().recent().is_empty());
    }
}
