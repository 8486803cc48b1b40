//! Request lifecycle enums shared by requests, responses and backends.

use serde::Serialize;
use std::fmt;

/// Completion status of a single request attempt.
///
/// Moves only `NotStarted → Processing → {Succeeded | Failed}`. Going back to
/// `NotStarted` requires an explicit [`HttpRequest::reset`](crate::HttpRequest::reset).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RequestStatus {
    #[default]
    NotStarted = 0,
    Processing = 1,
    Succeeded = 2,
    Failed = 3,
}

impl RequestStatus {
    /// Returns true once the attempt can no longer change.
    pub fn is_finished(self) -> bool {
        matches!(self, RequestStatus::Succeeded | RequestStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::NotStarted => "not_started",
            RequestStatus::Processing => "processing",
            RequestStatus::Succeeded => "succeeded",
            RequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt failed.
///
/// When several causes apply at once, the most specific one wins in this
/// order: a reason reported by the backend, `Cancelled`, `TimedOut`, an
/// activity stall (`ConnectionError`), then `Other`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum FailureReason {
    /// No failure recorded yet.
    #[default]
    None = 0,
    /// DNS/connect failure, or an activity stall without a native equivalent.
    ConnectionError = 1,
    /// Explicit cancellation or teardown.
    Cancelled = 2,
    /// The total timeout elapsed.
    TimedOut = 3,
    /// Uncategorized backend error.
    Other = 4,
}

impl FailureReason {
    pub fn is_none(self) -> bool {
        self == FailureReason::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::None => "none",
            FailureReason::ConnectionError => "connection_error",
            FailureReason::Cancelled => "cancelled",
            FailureReason::TimedOut => "timed_out",
            FailureReason::Other => "other",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where completion, progress and status delegates run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DelegateThreadPolicy {
    /// Queue delegates for the caller, delivered by [`HttpManager::tick`](crate::HttpManager::tick).
    #[default]
    CompleteOnCallerThread,
    /// Run delegates inline on the I/O worker.
    CompleteOnIoThread,
}
