//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts >= 0, worker count > 0)
//! - Check mock failure rules and allow-list entries are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HttpConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::HttpConfig;
use crate::routing::matcher::MockFailureRules;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A timeout is negative or not a finite number.
    InvalidTimeout { field: &'static str, value: f64 },
    /// At least one worker thread is required.
    NoWorkerThreads,
    /// The threaded tick interval must be positive.
    ZeroTickInterval,
    /// Backoff base delay exceeds the maximum delay.
    BackoffRange { base_ms: u64, max_ms: u64 },
    /// A retry status code outside 100..=599.
    InvalidRetryStatus(u16),
    /// A malformed mock failure rule.
    InvalidMockPattern(String),
    /// An allow-list entry is blank.
    EmptyAllowedDomain,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidTimeout { field, value } => {
                write!(f, "{} must be a non-negative number, got {}", field, value)
            }
            ValidationError::NoWorkerThreads => write!(f, "worker_threads must be at least 1"),
            ValidationError::ZeroTickInterval => write!(f, "tick_interval_ms must be at least 1"),
            ValidationError::BackoffRange { base_ms, max_ms } => write!(
                f,
                "retries.base_delay_ms ({}) exceeds retries.max_delay_ms ({})",
                base_ms, max_ms
            ),
            ValidationError::InvalidRetryStatus(code) => {
                write!(f, "retry status code {} is not a valid HTTP status", code)
            }
            ValidationError::InvalidMockPattern(msg) => write!(f, "mock_failure_patterns: {}", msg),
            ValidationError::EmptyAllowedDomain => write!(f, "allowed_domains contains an empty entry"),
        }
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &HttpConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let timeouts = [
        ("timeouts.total_secs", config.timeouts.total_secs),
        ("timeouts.activity_secs", config.timeouts.activity_secs),
        ("timeouts.connection_secs", config.timeouts.connection_secs),
        ("retries.retry_timeout_secs", config.retries.retry_timeout_secs),
    ];
    for (field, value) in timeouts {
        if !value.is_finite() || value < 0.0 {
            errors.push(ValidationError::InvalidTimeout { field, value });
        }
    }

    if config.worker_threads == 0 {
        errors.push(ValidationError::NoWorkerThreads);
    }
    if config.tick_interval_ms == 0 {
        errors.push(ValidationError::ZeroTickInterval);
    }

    let retries = &config.retries;
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base_ms: retries.base_delay_ms,
            max_ms: retries.max_delay_ms,
        });
    }
    for &code in &retries.retry_status_codes {
        if !(100..=599).contains(&code) {
            errors.push(ValidationError::InvalidRetryStatus(code));
        }
    }

    if let Err(msg) = MockFailureRules::parse(&config.mock_failure_patterns) {
        errors.push(ValidationError::InvalidMockPattern(msg));
    }

    if config.allowed_domains.iter().any(|d| d.trim().is_empty()) {
        errors.push(ValidationError::EmptyAllowedDomain);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
