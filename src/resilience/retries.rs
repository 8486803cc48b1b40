//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a finished attempt is retried, and after how long
//! - Re-dispatch the same request (through `reset`) until it succeeds, the
//!   budget is spent, or the caller cancels
//! - Fire the caller's delegate once, with the final attempt
//!
//! # Design Decisions
//! - Connection errors have their own retry limit
//! - Retryable status codes are configurable (429/502/503/504 by default)
//! - `Retry-After` (seconds) wins over computed backoff, capped at the
//!   maximum delay
//! - Cancelled and timed-out attempts are never retried
//! - Cancelling between attempts runs a cancel-only attempt, so the caller
//!   sees `Cancelled` under the request's delegate thread policy
//! - Jittered backoff prevents thundering herd

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use super::backoff::calculate_backoff;
use crate::config::RetryConfig;
use crate::http::response::HttpResponse;
use crate::http::types::FailureReason;
use crate::manager::TaskHandle;
use crate::observability::metrics;
use crate::request::{CompletionDelegate, DispatchError, HttpRequest};

/// Called before each retry with the attempt that triggered it and the
/// lockout before the next dispatch. Runs where the completion delegate
/// would; changes made to the request apply to the retry.
pub type WillRetryDelegate =
    Arc<dyn Fn(&HttpRequest, Option<Arc<HttpResponse>>, Duration) + Send + Sync>;

/// What made an attempt retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    ConnectionError,
    StatusCode(u16),
}

impl RetryTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryTrigger::ConnectionError => "connection_error",
            RetryTrigger::StatusCode(_) => "status_code",
        }
    }
}

/// Retries already spent on a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounts {
    /// Retries after a retryable status code.
    pub status: u32,
    /// Retries after a connection error.
    pub connection: u32,
}

impl RetryCounts {
    pub fn total(&self) -> u32 {
        self.status + self.connection
    }
}

/// When and how often to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Zero falls back to `max_retries`.
    pub max_retries_connection_error: u32,
    pub retry_status_codes: Vec<u16>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stop retrying once this much time passed since the first attempt.
    pub retry_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_retries_connection_error: config.max_retries_connection_error,
            retry_status_codes: config.retry_status_codes.clone(),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retry_timeout: crate::config::schema::secs_to_duration(config.retry_timeout_secs),
        }
    }
}

impl RetryPolicy {
    fn connection_limit(&self) -> u32 {
        if self.max_retries_connection_error > 0 {
            self.max_retries_connection_error
        } else {
            self.max_retries
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        calculate_backoff(
            retry,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }

    /// Delay before the next retry, or `None` to stop.
    pub fn next_retry(
        &self,
        reason: FailureReason,
        response: Option<&HttpResponse>,
        counts: RetryCounts,
        elapsed: Duration,
    ) -> Option<(Duration, RetryTrigger)> {
        let (delay, trigger) = match reason {
            FailureReason::ConnectionError => {
                if counts.connection >= self.connection_limit() {
                    return None;
                }
                (
                    self.backoff(counts.connection + 1),
                    RetryTrigger::ConnectionError,
                )
            }
            FailureReason::None => {
                let response = response?;
                let status = response.status();
                if !self.retry_status_codes.contains(&status) || counts.status >= self.max_retries {
                    return None;
                }
                let delay = response
                    .retry_after()
                    .map(|d| d.min(self.max_delay))
                    .unwrap_or_else(|| self.backoff(counts.status + 1));
                (delay, RetryTrigger::StatusCode(status))
            }
            FailureReason::Cancelled | FailureReason::TimedOut | FailureReason::Other => {
                return None
            }
        };

        if let Some(limit) = self.retry_timeout {
            if elapsed + delay > limit {
                return None;
            }
        }
        Some((delay, trigger))
    }
}

#[derive(Default)]
struct RetryState {
    counts: RetryCounts,
    started_at: Option<Instant>,
    pending: Option<TaskHandle>,
    last: Option<(Option<Arc<HttpResponse>>, bool)>,
}

struct RetryShared {
    request: HttpRequest,
    policy: RetryPolicy,
    delegate: RwLock<Option<CompletionDelegate>>,
    will_retry: RwLock<Option<WillRetryDelegate>>,
    state: Mutex<RetryState>,
    cancelled: AtomicBool,
    delivered: AtomicBool,
}

/// A request that retries itself according to a [`RetryPolicy`].
///
/// Takes over the wrapped request's completion delegate.
#[derive(Clone)]
pub struct RetryingRequest {
    shared: Arc<RetryShared>,
}

impl RetryingRequest {
    pub fn new(request: HttpRequest, policy: RetryPolicy) -> Self {
        let shared = Arc::new(RetryShared {
            request,
            policy,
            delegate: RwLock::new(None),
            will_retry: RwLock::new(None),
            state: Mutex::new(RetryState::default()),
            cancelled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
        });

        let weak: Weak<RetryShared> = Arc::downgrade(&shared);
        shared
            .request
            .on_process_request_complete(move |request, response, succeeded| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_attempt_complete(request, response, succeeded);
                }
            });

        Self { shared }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.shared.request
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Called once with the final attempt.
    pub fn on_process_request_complete<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, Option<Arc<HttpResponse>>, bool) + Send + Sync + 'static,
    {
        *self
            .shared
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(delegate));
    }

    /// Called before every retry is scheduled.
    pub fn on_request_will_retry<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, Option<Arc<HttpResponse>>, Duration) + Send + Sync + 'static,
    {
        *self
            .shared
            .will_retry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(delegate));
    }

    /// Dispatch the first attempt. Same contract as
    /// [`HttpRequest::process_request`].
    pub fn process_request(&self) -> bool {
        match self.try_process_request() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(request_id = %self.shared.request.id(), error = %e, "Request not dispatched");
                false
            }
        }
    }

    /// Dispatch the first attempt, reporting why it could not start.
    pub fn try_process_request(&self) -> Result<(), DispatchError> {
        let shared = &self.shared;
        {
            let mut state = shared.lock_state();
            if let Some(pending) = state.pending.take() {
                pending.cancel();
            }
            *state = RetryState {
                started_at: Some(Instant::now()),
                ..Default::default()
            };
        }
        shared.cancelled.store(false, Ordering::SeqCst);
        shared.delivered.store(false, Ordering::SeqCst);
        shared.request.try_process_request()
    }

    /// Stop retrying and cancel the current attempt.
    ///
    /// The delegate fires once, later, with `Cancelled`. If a retry was
    /// waiting, the previous attempt is dropped and a cancel-only attempt
    /// reports the cancellation.
    pub fn cancel_request(&self) {
        let shared = &self.shared;
        if shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let waiting = {
            let mut state = shared.lock_state();
            let pending = state.pending.take();
            if let Some(pending) = &pending {
                pending.cancel();
                state.last = None;
            }
            pending.is_some()
        };

        if waiting {
            shared.request.reset();
        }
        shared.request.cancel_request();
    }

    pub fn retry_counts(&self) -> RetryCounts {
        self.shared.lock_state().counts
    }
}

impl RetryShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_attempt_complete(
        self: &Arc<Self>,
        request: &HttpRequest,
        response: Option<Arc<HttpResponse>>,
        succeeded: bool,
    ) {
        if self.cancelled.load(Ordering::SeqCst) {
            self.deliver(request, response, succeeded);
            return;
        }

        let (counts, elapsed) = {
            let state = self.lock_state();
            let elapsed = state
                .started_at
                .map(|start| start.elapsed())
                .unwrap_or_default();
            (state.counts, elapsed)
        };

        let decision = self.policy.next_retry(
            request.failure_reason(),
            response.as_deref(),
            counts,
            elapsed,
        );
        let Some((delay, trigger)) = decision else {
            self.deliver(request, response, succeeded);
            return;
        };
        let Some(manager) = request.manager() else {
            self.deliver(request, response, succeeded);
            return;
        };

        let will_retry = self
            .will_retry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(will_retry) = will_retry {
            will_retry(request, response.clone(), delay);
        }

        tracing::info!(
            request_id = %request.id(),
            trigger = trigger.as_str(),
            retry = counts.total() + 1,
            delay_ms = delay.as_millis() as u64,
            "Retrying request"
        );
        metrics::record_retry(trigger.as_str());

        let weak = Arc::downgrade(self);
        let mut state = self.lock_state();
        if self.cancelled.load(Ordering::SeqCst) {
            drop(state);
            self.deliver(request, response, succeeded);
            return;
        }
        match trigger {
            RetryTrigger::ConnectionError => state.counts.connection += 1,
            RetryTrigger::StatusCode(_) => state.counts.status += 1,
        }
        state.last = Some((response, succeeded));
        state.pending = Some(manager.schedule_after(delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.retry_now();
            }
        }));
    }

    fn retry_now(self: &Arc<Self>) {
        let last = {
            let mut state = self.lock_state();
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            state.pending = None;
            self.request.reset();
            state.last.take()
        };

        // A cancel racing this dispatch reports through the request itself.
        if !self.request.process_request() && !self.cancelled.load(Ordering::SeqCst) {
            let (response, succeeded) = last.unwrap_or((None, false));
            self.deliver(&self.request, response, succeeded);
        }
    }

    /// Fire the caller's delegate, at most once per `process_request`.
    fn deliver(&self, request: &HttpRequest, response: Option<Arc<HttpResponse>>, succeeded: bool) {
        if self.delivered.swap(true, Ordering::SeqCst) {
            return;
        }
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            delegate(request, response, succeeded);
        }
    }
}
