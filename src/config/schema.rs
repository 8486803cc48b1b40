//! Configuration schema definitions.
//!
//! This module defines the process-wide defaults applied to every request
//! created by an [`HttpManager`](crate::HttpManager). All types derive Serde
//! traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the HTTP manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent sent when a request does not set one.
    pub user_agent: String,

    /// Hosts requests may target. Empty allows every host.
    /// An entry matches the host itself and any subdomain.
    pub allowed_domains: Vec<String>,

    /// Headers added to every request that does not already carry them.
    pub default_headers: BTreeMap<String, String>,

    /// Whitespace-separated `host->status` rules that short-circuit matching
    /// requests without I/O. Status `0` simulates a connection error.
    pub mock_failure_patterns: String,

    /// Number of I/O worker threads.
    pub worker_threads: usize,

    /// Interval of the worker's threaded tick in milliseconds.
    pub tick_interval_ms: u64,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("http-lifecycle/{}", env!("CARGO_PKG_VERSION")),
            allowed_domains: Vec::new(),
            default_headers: BTreeMap::new(),
            mock_failure_patterns: String::new(),
            worker_threads: 2,
            tick_interval_ms: 50,
            timeouts: TimeoutConfig::default(),
            retries: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl HttpConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Default request timeouts, in seconds. Zero disables a timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ceiling on a whole attempt, from dispatch to completion.
    pub total_secs: f64,

    /// Ceiling on silence since the last observed progress.
    pub activity_secs: f64,

    /// Ceiling on establishing a connection. Applied by transports that
    /// connect themselves.
    pub connection_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            total_secs: 0.0,
            activity_secs: 30.0,
            connection_secs: 0.0,
        }
    }
}

impl TimeoutConfig {
    pub fn total(&self) -> Option<Duration> {
        secs_to_duration(self.total_secs)
    }

    pub fn activity(&self) -> Option<Duration> {
        secs_to_duration(self.activity_secs)
    }

    pub fn connection(&self) -> Option<Duration> {
        secs_to_duration(self.connection_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Retry limit for connection errors. Zero falls back to `max_retries`.
    pub max_retries_connection_error: u32,

    /// Response codes that are retried.
    pub retry_status_codes: Vec<u16>,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Give up retrying once this much time passed since the first attempt.
    /// Zero means unlimited.
    pub retry_timeout_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            max_retries_connection_error: 0,
            retry_status_codes: vec![429, 502, 503, 504],
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            retry_timeout_secs: 0.0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Convert a seconds setting into a duration, treating zero (and invalid
/// values) as disabled.
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
