//! Metrics collection.
//!
//! # Responsibilities
//! - Define request lifecycle metrics
//! - Record through the `metrics` facade; exporting is up to the host
//!   application's recorder
//!
//! # Metrics
//! - `http_requests_total` (counter): finished attempts by outcome, reason
//! - `http_request_duration_seconds` (histogram): dispatch-to-finish latency
//! - `http_requests_in_flight` (gauge): attempts currently dispatched
//! - `http_request_retries_total` (counter): retries scheduled by reason
//!
//! # Design Decisions
//! - Low-overhead metric updates (no-op without a recorder)
//! - Labels are static strings to keep cardinality bounded

use std::time::Duration;

use crate::http::types::FailureReason;

/// Record a finished attempt.
pub fn record_request(succeeded: bool, reason: FailureReason, elapsed: Duration) {
    let outcome = if succeeded { "succeeded" } else { "failed" };
    metrics::counter!("http_requests_total", "outcome" => outcome, "reason" => reason.as_str())
        .increment(1);
    metrics::histogram!("http_request_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

/// Record the current number of in-flight attempts.
pub fn record_in_flight(count: usize) {
    metrics::gauge!("http_requests_in_flight").set(count as f64);
}

/// Record a scheduled retry.
pub fn record_retry(trigger: &'static str) {
    metrics::counter!("http_request_retries_total", "trigger" => trigger).increment(1);
}
