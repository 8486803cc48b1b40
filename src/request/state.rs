//! Per-attempt state and the single finish path.
//!
//! # Design Decisions
//! - `attempt` (the generation) is the authority: a finish for an older
//!   generation, or for an attempt already terminal, is dropped
//! - The failure reason is resolved in one place, in a fixed priority order
//! - Timers are cancelled and `cleanup_request` runs before the delegate is
//!   handed to the dispatcher

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use super::{lock, read, BackendContext, HttpRequest, RequestInner, RequestSnapshot};
use crate::http::types::{DelegateThreadPolicy, FailureReason, RequestStatus};
use crate::manager::Delivery;
use crate::observability::metrics;

/// Attempt state guarded by the state lock.
#[derive(Default)]
pub(super) struct AttemptState {
    pub(super) status: RequestStatus,
    pub(super) reason: FailureReason,
    pub(super) attempt: u64,
    pub(super) policy: DelegateThreadPolicy,
    pub(super) snapshot: Option<Arc<RequestSnapshot>>,
    pub(super) effective_url: Option<String>,
    pub(super) started_at: Option<Instant>,
    pub(super) finished_at: Option<Instant>,
    pub(super) waiter: Option<mpsc::Sender<()>>,
    pub(super) force_io_thread: bool,
}

/// How an attempt ended, before flags are taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// The backend delivered a full response.
    Completed,
    /// The backend reported a failure.
    Failed(FailureReason),
    /// Cancel, timeout or teardown cut the attempt short.
    Aborted,
}

/// Resolve the final failure reason.
///
/// Priority: backend reason > cancelled > total timeout > activity timeout
/// (connection error) > other. `None` means success.
pub(crate) fn resolve_reason(
    finish: Finish,
    cancelled: bool,
    timed_out: bool,
    activity_timed_out: bool,
) -> FailureReason {
    match finish {
        Finish::Failed(reason) if !reason.is_none() => reason,
        _ if cancelled => FailureReason::Cancelled,
        _ if timed_out => FailureReason::TimedOut,
        _ if activity_timed_out => FailureReason::ConnectionError,
        Finish::Completed => FailureReason::None,
        _ => FailureReason::Other,
    }
}

impl RequestInner {
    /// Reset attempt-scoped state for a freshly claimed generation.
    pub(super) fn begin_attempt(
        &self,
        generation: u64,
        policy: DelegateThreadPolicy,
        snapshot: Option<Arc<RequestSnapshot>>,
    ) {
        {
            let mut state = lock(&self.state);
            state.status = RequestStatus::NotStarted;
            state.reason = FailureReason::None;
            state.attempt = generation;
            state.policy = if state.force_io_thread {
                DelegateThreadPolicy::CompleteOnIoThread
            } else {
                policy
            };
            state.snapshot = snapshot;
            state.effective_url = None;
            state.started_at = Some(Instant::now());
            state.finished_at = None;
        }
        lock(&self.response).take();
        lock(&self.completed).take();
        *lock(&self.last_progress) = (0, 0);
        self.aborted.store(false, Ordering::SeqCst);
        self.activity_timed_out.store(false, Ordering::SeqCst);
        self.activity_window_us.store(0, Ordering::SeqCst);
        self.activity_deadline_us.store(0, Ordering::SeqCst);
        self.bytes_sent.store(0, Ordering::SeqCst);
        self.bytes_received.store(0, Ordering::SeqCst);
    }

    /// Finish an attempt. Every trigger funnels through here; only the first
    /// call for a live generation has any effect.
    pub(crate) fn finish(self: &Arc<Self>, generation: u64, finish: Finish) {
        let reason = resolve_reason(
            finish,
            self.cancelled.load(Ordering::SeqCst),
            self.timed_out.load(Ordering::SeqCst),
            self.activity_timed_out.load(Ordering::SeqCst),
        );

        let (policy, snapshot, waiter, elapsed) = {
            let mut state = lock(&self.state);
            if state.attempt != generation || state.status.is_finished() {
                if let Finish::Failed(late) = finish {
                    if state.attempt == generation && !late.is_none() && late != state.reason {
                        tracing::warn!(
                            request_id = %self.id,
                            reason = %late,
                            recorded = %state.reason,
                            "Failure reason already set for this attempt, ignoring"
                        );
                    }
                }
                return;
            }

            state.status = if reason.is_none() {
                RequestStatus::Succeeded
            } else {
                RequestStatus::Failed
            };
            state.reason = reason;
            let now = Instant::now();
            state.finished_at = Some(now);
            let elapsed = state
                .started_at
                .map(|start| now.duration_since(start))
                .unwrap_or_default();
            state.force_io_thread = false;
            (state.policy, state.snapshot.clone(), state.waiter.take(), elapsed)
        };
        let succeeded = reason.is_none();

        self.total_timer.cancel();
        self.activity_timer.cancel();
        lock(&self.sink).take();

        let backend = lock(&self.backend).take();
        let partial = lock(&self.response).take();
        let response = match reason {
            FailureReason::ConnectionError => None,
            _ => partial.or_else(|| {
                let backend = backend.as_ref()?;
                let snapshot = snapshot?;
                let ctx = BackendContext::new(Arc::downgrade(self), generation, snapshot);
                Some(backend.create_response(&ctx))
            }),
        }
        .map(|mut response| {
            response.set_failure_reason(reason);
            Arc::new(response)
        });

        if let Some(backend) = backend {
            backend.cleanup_request();
        }
        *lock(&self.completed) = response.clone();

        // Unregister before releasing the claim so a redispatch from another
        // thread registers after us.
        let manager = self.manager.upgrade();
        if let Some(manager) = &manager {
            manager.request_finished(self.id, succeeded);
        }
        self.in_flight.store(false, Ordering::SeqCst);

        let status_code = response.as_ref().map(|r| r.status()).unwrap_or(0);
        let elapsed_ms = elapsed.as_millis() as u64;
        match reason {
            FailureReason::None => tracing::info!(
                request_id = %self.id,
                attempt = generation,
                status = status_code,
                elapsed_ms,
                "Request succeeded"
            ),
            FailureReason::Cancelled => tracing::info!(
                request_id = %self.id,
                attempt = generation,
                elapsed_ms,
                "Request cancelled"
            ),
            _ => tracing::warn!(
                request_id = %self.id,
                attempt = generation,
                reason = %reason,
                status = status_code,
                elapsed_ms,
                "Request failed"
            ),
        }
        metrics::record_request(succeeded, reason, elapsed);

        let delegate = read(&self.delegates).completion.clone();
        let inner = self.clone();
        let delivery: Delivery = Box::new(move || {
            let request = HttpRequest::from_inner(inner);
            if let Some(delegate) = delegate {
                delegate(&request, response, succeeded);
            }
            if let Some(waiter) = waiter {
                let _ = waiter.send(());
            }
        });

        match manager {
            Some(manager) => manager.deliver_completion(policy, delivery),
            None => delivery(),
        }
    }
}
