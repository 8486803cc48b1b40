//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt finished (completion delegate):
//!     → retries.rs (retryable? Retry-After or backoff.rs delay)
//!     → scheduler delay → reset() → process_request()
//!     → final attempt → caller's delegate (once)
//! ```
//!
//! # Design Decisions
//! - Timeouts live with the request; this layer only decides about retries
//! - Retries reuse the same request handle, so ids and delegates persist

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::{RetryCounts, RetryPolicy, RetryTrigger, RetryingRequest, WillRetryDelegate};
