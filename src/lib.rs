//! # Claude Usage Monitor
//!
//! Tracks Claude plan usage from two sources and reconciles them for display.
//!
//! ## Overview
//!
//! - Remote: a persistent browser profile is driven to the account's usage
//!   page; the page's own internal API calls are captured and replayed, with
//!   rendered-text scraping as a fallback
//! - Local: the CLI's JSONL session logs are parsed for deduplicated token
//!   totals and the cache footprint of the conversation active right now
//!
//! The browser engine itself is a capability supplied by the caller through
//! the traits in [`browser`].
//!
//! ## Features
//!
//! - `colors` (default): Enables terminal color output via owo-colors

/// Session cookie checks, login polling and profile clearing
pub mod auth;

/// Browser capability traits, executable discovery and in-page fetch
pub mod browser;

/// Command-line argument parsing
pub mod cli;

/// Resolved runtime configuration
pub mod config;

/// Explicit runtime context with the debug channel
pub mod context;

/// Display formatting for text and JSON output
pub mod display;

/// Error types for browser backends and acquisition cycles
pub mod error;

/// Data models for log lines, usage records and persisted state
pub mod models;

/// View model merging remote and local usage
pub mod reconcile;

/// Acquisition cycle: launch, login, capture, replay, fallback
pub mod scraper;

/// Persisted sessions and usage history
pub mod store;

/// Local JSONL log aggregation
pub mod usage;

/// Internal API payload normalization and page-text parsing
pub mod usage_api;

/// Utility functions for paths, formatting, and time
pub mod utils;
