//! Request orchestration.
//!
//! # Responsibilities
//! - Hold caller configuration (URL, verb, headers, options, content)
//! - Validate and dispatch attempts onto the I/O worker
//! - Drive the per-attempt state machine to exactly one finish
//! - Deliver completion, progress and status delegates
//!
//! # Data Flow
//! ```text
//! caller: process_request()
//!     → validate (url, verb, allow-list, in-flight, timed-out, manager)
//!     → claim attempt, build snapshot, post setup
//! worker: setup
//!     → cancelled? finish(Cancelled) without I/O
//!     → Backend::setup_request, arm Total/Activity timers, Processing
//! any thread: BackendContext events → response, activity deadline
//! worker: complete / fail / timer / cancel → finish (once) → dispatcher
//! ```
//!
//! # Design Decisions
//! - `HttpRequest` is a cheap handle; timers and backends hold only `Weak`
//!   references plus the attempt generation
//! - One lock per field (state, response, sink, timers, settings); no lock is
//!   held while calling a backend or a delegate
//! - Lock order: control → state → timer slot

mod error;
pub mod events;
mod state;
mod timeouts;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::{Duration, Instant};

use url::Url;
use uuid::Uuid;

use crate::backend::Backend;
use crate::http::content::{ContentSource, ResponseSink};
use crate::http::headers::HeaderMap;
use crate::http::response::HttpResponse;
use crate::http::types::{DelegateThreadPolicy, FailureReason, RequestStatus};
use crate::manager::{HttpManager, ManagerShared};
use crate::routing::Matcher;

pub use error::DispatchError;
pub use events::{BackendContext, RequestSnapshot};
pub(crate) use state::Finish;

use state::AttemptState;

/// Called once per dispatched attempt with the response (absent on a
/// connection error) and whether the attempt succeeded.
pub type CompletionDelegate =
    Arc<dyn Fn(&HttpRequest, Option<Arc<HttpResponse>>, bool) + Send + Sync>;

/// Called with `(bytes_sent, bytes_received)` when either changed.
pub type ProgressDelegate = Arc<dyn Fn(&HttpRequest, u64, u64) + Send + Sync>;

/// Called when the response status line arrives.
pub type StatusCodeDelegate = Arc<dyn Fn(&HttpRequest, u16) + Send + Sync>;

/// Called with `(name, value)` for every response header.
pub type HeaderReceivedDelegate = Arc<dyn Fn(&HttpRequest, &str, &str) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Caller configuration, copied into a snapshot at dispatch.
#[derive(Debug, Clone)]
struct RequestSettings {
    url: String,
    verb: String,
    headers: HeaderMap,
    options: BTreeMap<String, String>,
    content: ContentSource,
    total_timeout: Option<Duration>,
    activity_timeout: Option<Duration>,
    policy: DelegateThreadPolicy,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            verb: "GET".to_string(),
            headers: HeaderMap::new(),
            options: BTreeMap::new(),
            content: ContentSource::None,
            total_timeout: None,
            activity_timeout: None,
            policy: DelegateThreadPolicy::default(),
        }
    }
}

#[derive(Default, Clone)]
struct Delegates {
    completion: Option<CompletionDelegate>,
    progress: Option<ProgressDelegate>,
    status: Option<StatusCodeDelegate>,
    header: Option<HeaderReceivedDelegate>,
}

/// What cut an attempt short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortCause {
    Cancel,
    TotalTimeout,
    ActivityTimeout,
}

/// What the worker needs to start an attempt.
struct AttemptPlan {
    snapshot: Arc<RequestSnapshot>,
    total_timeout: Option<Duration>,
    activity_timeout: Option<Duration>,
    mock_status: Option<u16>,
}

pub(crate) struct RequestInner {
    id: Uuid,
    manager: Weak<ManagerShared>,
    epoch: Instant,

    settings: RwLock<RequestSettings>,
    delegates: RwLock<Delegates>,

    /// Serializes backend setup against abort.
    control: Mutex<()>,
    state: Mutex<AttemptState>,
    response: Mutex<Option<HttpResponse>>,
    completed: Mutex<Option<Arc<HttpResponse>>>,
    sink: Mutex<Option<ResponseSink>>,
    backend: Mutex<Option<Arc<dyn Backend>>>,
    last_progress: Mutex<(u64, u64)>,

    total_timer: crate::manager::scheduler::TimerSlot,
    activity_timer: crate::manager::scheduler::TimerSlot,

    generation: AtomicU64,
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    aborted: AtomicBool,
    timed_out: AtomicBool,
    activity_timed_out: AtomicBool,
    activity_window_us: AtomicU64,
    activity_deadline_us: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl RequestInner {
    fn new(manager: Weak<ManagerShared>) -> Self {
        Self {
            id: Uuid::new_v4(),
            manager,
            epoch: Instant::now(),
            settings: RwLock::new(RequestSettings::default()),
            delegates: RwLock::new(Delegates::default()),
            control: Mutex::new(()),
            state: Mutex::new(AttemptState::default()),
            response: Mutex::new(None),
            completed: Mutex::new(None),
            sink: Mutex::new(None),
            backend: Mutex::new(None),
            last_progress: Mutex::new((0, 0)),
            total_timer: Default::default(),
            activity_timer: Default::default(),
            generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            activity_timed_out: AtomicBool::new(false),
            activity_window_us: AtomicU64::new(0),
            activity_deadline_us: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// True while `generation` is the current, unfinished attempt.
    fn is_live(&self, generation: u64) -> bool {
        let state = lock(&self.state);
        state.attempt == generation && !state.status.is_finished()
    }

    fn current_backend(&self) -> Option<Arc<dyn Backend>> {
        lock(&self.backend).clone()
    }

    /// Start a claimed attempt. Runs on the worker.
    fn start_attempt(self: &Arc<Self>, generation: u64, plan: AttemptPlan) {
        let Some(manager) = self.manager.upgrade() else {
            self.finish(generation, Finish::Aborted);
            return;
        };

        let control = lock(&self.control);
        if !self.is_live(generation) {
            return;
        }
        if self.cancelled.load(Ordering::SeqCst) {
            drop(control);
            tracing::debug!(request_id = %self.id, "Cancelled before setup, skipping I/O");
            self.finish(generation, Finish::Aborted);
            return;
        }

        let backend: Arc<dyn Backend> = Arc::from(manager.create_backend());
        *lock(&self.backend) = Some(backend.clone());
        let ctx = BackendContext::new(Arc::downgrade(self), generation, plan.snapshot.clone());

        if let Some(status) = plan.mock_status {
            drop(control);
            self.finish_mocked(generation, &backend, &ctx, status);
            return;
        }

        if !backend.setup_request(ctx) {
            drop(control);
            tracing::warn!(
                request_id = %self.id,
                url = %plan.snapshot.url,
                "Backend setup failed"
            );
            self.finish(generation, Finish::Failed(FailureReason::ConnectionError));
            return;
        }

        let activity_timeout = if backend.has_native_activity_timeout() {
            None
        } else {
            plan.activity_timeout
        };

        {
            let mut state = lock(&self.state);
            if state.attempt != generation || state.status != RequestStatus::NotStarted {
                return;
            }
            state.status = RequestStatus::Processing;
            self.arm_timers(&manager, generation, plan.total_timeout, activity_timeout);
        }
        drop(control);

        tracing::debug!(
            request_id = %self.id,
            attempt = generation,
            total_timeout_ms = plan.total_timeout.map(|d| d.as_millis() as u64),
            activity_timeout_ms = activity_timeout.map(|d| d.as_millis() as u64),
            "Request processing"
        );
    }

    /// Short-circuit an attempt to a canned outcome without I/O.
    fn finish_mocked(
        self: &Arc<Self>,
        generation: u64,
        backend: &Arc<dyn Backend>,
        ctx: &BackendContext,
        status: u16,
    ) {
        tracing::info!(request_id = %self.id, status, "Mock failure rule matched");
        if status == 0 {
            self.finish(generation, Finish::Failed(FailureReason::ConnectionError));
            return;
        }

        let mut response = backend.create_response(ctx);
        backend.mock_response_data(&mut response, status);
        *lock(&self.response) = Some(response);
        self.finish(generation, Finish::Completed);
    }

    /// Abort the attempt through the backend, then finish it. Runs on the worker.
    ///
    /// Timeout marks are only set for an attempt that is still live, so a
    /// timer losing the race against completion leaves no trace.
    pub(crate) fn abort(self: &Arc<Self>, generation: u64, cause: AbortCause) {
        let backend = {
            let _control = lock(&self.control);
            if !self.is_live(generation) || self.aborted.swap(true, Ordering::SeqCst) {
                return;
            }
            match cause {
                AbortCause::Cancel => {}
                AbortCause::TotalTimeout => {
                    self.timed_out.store(true, Ordering::SeqCst);
                    self.activity_timer.cancel();
                    tracing::warn!(request_id = %self.id, attempt = generation, "Total timeout elapsed");
                }
                AbortCause::ActivityTimeout => {
                    self.activity_timed_out.store(true, Ordering::SeqCst);
                    tracing::warn!(
                        request_id = %self.id,
                        attempt = generation,
                        idle_ms = Duration::from_micros(self.activity_window_us.load(Ordering::Acquire))
                            .as_millis() as u64,
                        "Activity timeout, no progress"
                    );
                }
            }
            self.current_backend()
        };

        if let Some(backend) = backend {
            backend.abort_request();
        }
        self.finish(generation, Finish::Aborted);
    }

    /// Cancel and finish inline. Used when the manager goes away.
    pub(crate) fn teardown(self: &Arc<Self>) {
        self.cancelled.store(true, Ordering::SeqCst);
        lock(&self.sink).take();
        let generation = self.generation.load(Ordering::SeqCst);
        self.abort(generation, AbortCause::Cancel);
    }

    /// Post work for this request onto the worker, or run it inline once the
    /// manager is gone.
    fn post<F>(self: &Arc<Self>, task: F)
    where
        F: FnOnce(Arc<RequestInner>) + Send + 'static,
    {
        let inner = self.clone();
        match self.manager.upgrade() {
            Some(manager) => manager.scheduler().spawn(move || task(inner)),
            None => task(inner),
        }
    }

    fn attempt_policy(&self) -> DelegateThreadPolicy {
        lock(&self.state).policy
    }

    /// Report progress if it changed. Called from manager ticks.
    pub(crate) fn sample_progress(self: &Arc<Self>, policy: DelegateThreadPolicy) {
        if self.attempt_policy() != policy {
            return;
        }
        let Some(delegate) = read(&self.delegates).progress.clone() else {
            return;
        };

        let current = (
            self.bytes_sent.load(Ordering::Acquire),
            self.bytes_received.load(Ordering::Acquire),
        );
        {
            let mut last = lock(&self.last_progress);
            if *last == current {
                return;
            }
            *last = current;
        }

        let request = HttpRequest { inner: self.clone() };
        delegate(&request, current.0, current.1);
    }

    pub(crate) fn tick_backend(&self, threaded: bool) {
        if let Some(backend) = self.current_backend() {
            if threaded {
                backend.tick_threaded();
            } else {
                backend.tick();
            }
        }
    }
}

impl Drop for RequestInner {
    fn drop(&mut self) {
        self.total_timer.cancel();
        self.activity_timer.cancel();

        let backend = self
            .backend
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let manager = self.manager.upgrade();
        if let Some(backend) = backend {
            tracing::debug!(request_id = %self.id, "Request dropped mid-flight, releasing backend");
            let release = move || {
                backend.abort_request();
                backend.cleanup_request();
            };
            // Backend calls belong on the worker while it still runs.
            match &manager {
                Some(manager) => manager.scheduler().spawn(release),
                None => release(),
            }
        }

        if *self.in_flight.get_mut() {
            if let Some(manager) = &manager {
                manager.request_dropped(self.id);
            }
        }
    }
}

/// Handle to one HTTP request.
///
/// Cloning shares the request. Configuration changes made while an attempt is
/// in flight apply to the next dispatch.
#[derive(Clone)]
pub struct HttpRequest {
    inner: Arc<RequestInner>,
}

impl HttpRequest {
    /// Create a request bound to a manager.
    pub fn new(manager: &HttpManager) -> Self {
        Self {
            inner: Arc::new(RequestInner::new(manager.downgrade())),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The manager this request is bound to, if it still exists.
    pub fn manager(&self) -> Option<HttpManager> {
        self.inner.manager.upgrade().map(HttpManager::from_shared)
    }

    // -- configuration --

    pub fn url(&self) -> String {
        read(&self.inner.settings).url.clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        write(&self.inner.settings).url = url.into();
    }

    pub fn verb(&self) -> String {
        read(&self.inner.settings).verb.clone()
    }

    pub fn set_verb(&self, verb: impl Into<String>) {
        write(&self.inner.settings).verb = verb.into();
    }

    pub fn header(&self, name: &str) -> Option<String> {
        read(&self.inner.settings).headers.get(name).map(str::to_string)
    }

    pub fn headers(&self) -> HeaderMap {
        read(&self.inner.settings).headers.clone()
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        write(&self.inner.settings).headers.insert(name, value);
    }

    /// Add a header value, joining with an existing one.
    pub fn append_header(&self, name: impl Into<String>, value: impl Into<String>) {
        write(&self.inner.settings).headers.append(name, value);
    }

    pub fn option(&self, name: &str) -> Option<String> {
        read(&self.inner.settings).options.get(name).cloned()
    }

    /// Set a transport option. Interpreted by the backend.
    pub fn set_option(&self, name: impl Into<String>, value: impl Into<String>) {
        write(&self.inner.settings)
            .options
            .insert(name.into(), value.into());
    }

    pub fn set_content(&self, content: ContentSource) {
        write(&self.inner.settings).content = content;
    }

    pub fn set_content_bytes(&self, content: impl Into<Vec<u8>>) {
        self.set_content(ContentSource::bytes(content));
    }

    pub fn set_content_as_string(&self, content: impl Into<String>) {
        self.set_content(ContentSource::bytes(content.into().into_bytes()));
    }

    pub fn set_content_from_file(&self, path: impl Into<PathBuf>) {
        self.set_content(ContentSource::file(path));
    }

    /// Upload from a reader. The reader is consumed by the first attempt.
    pub fn set_content_from_reader(&self, reader: impl Read + Send + 'static) {
        self.set_content(ContentSource::reader(reader));
    }

    /// Request body length, if known.
    pub fn content_length(&self) -> Option<u64> {
        read(&self.inner.settings).content.len_hint()
    }

    /// Stream response content into `sink` instead of buffering it.
    pub fn set_response_sink(&self, sink: impl Write + Send + 'static) {
        *lock(&self.inner.sink) = Some(Box::new(sink));
    }

    /// Override the total timeout. `Duration::ZERO` disables it.
    pub fn set_timeout(&self, timeout: Duration) {
        write(&self.inner.settings).total_timeout = Some(timeout);
    }

    /// Fall back to the manager's default total timeout.
    pub fn clear_timeout(&self) {
        write(&self.inner.settings).total_timeout = None;
    }

    pub fn timeout(&self) -> Option<Duration> {
        read(&self.inner.settings).total_timeout
    }

    /// Override the activity timeout. `Duration::ZERO` disables it.
    pub fn set_activity_timeout(&self, timeout: Duration) {
        write(&self.inner.settings).activity_timeout = Some(timeout);
    }

    pub fn clear_activity_timeout(&self) {
        write(&self.inner.settings).activity_timeout = None;
    }

    pub fn activity_timeout(&self) -> Option<Duration> {
        read(&self.inner.settings).activity_timeout
    }

    pub fn set_delegate_thread_policy(&self, policy: DelegateThreadPolicy) {
        write(&self.inner.settings).policy = policy;
    }

    pub fn delegate_thread_policy(&self) -> DelegateThreadPolicy {
        read(&self.inner.settings).policy
    }

    // -- delegates --

    pub fn on_process_request_complete<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, Option<Arc<HttpResponse>>, bool) + Send + Sync + 'static,
    {
        write(&self.inner.delegates).completion = Some(Arc::new(delegate));
    }

    pub fn on_request_progress<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, u64, u64) + Send + Sync + 'static,
    {
        write(&self.inner.delegates).progress = Some(Arc::new(delegate));
    }

    pub fn on_status_code_received<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, u16) + Send + Sync + 'static,
    {
        write(&self.inner.delegates).status = Some(Arc::new(delegate));
    }

    /// Called for every response header, under the delegate thread policy.
    pub fn on_header_received<F>(&self, delegate: F)
    where
        F: Fn(&HttpRequest, &str, &str) + Send + Sync + 'static,
    {
        write(&self.inner.delegates).header = Some(Arc::new(delegate));
    }

    pub fn clear_delegates(&self) {
        *write(&self.inner.delegates) = Delegates::default();
    }

    // -- lifecycle --

    /// Dispatch the request.
    ///
    /// Returns false if a precondition failed; no delegate fires in that case.
    pub fn process_request(&self) -> bool {
        match self.try_process_request() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(request_id = %self.inner.id, error = %e, "Request not dispatched");
                false
            }
        }
    }

    /// Dispatch the request, reporting why it could not start.
    pub fn try_process_request(&self) -> Result<(), DispatchError> {
        let inner = &self.inner;
        let manager = inner
            .manager
            .upgrade()
            .ok_or(DispatchError::ManagerUnavailable)?;
        if !manager.is_accepting() {
            return Err(DispatchError::ShutDown);
        }

        let settings = read(&inner.settings).clone();
        let url = validate_url(&settings.url)?;
        let verb = settings.verb.trim().to_ascii_uppercase();
        if verb.is_empty() {
            return Err(DispatchError::EmptyVerb);
        }

        let rules = manager.rules();
        if !rules.allowed.matches(&url) {
            return Err(DispatchError::DomainNotAllowed(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }
        if inner.timed_out.load(Ordering::SeqCst) {
            return Err(DispatchError::TimedOut);
        }
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DispatchError::AlreadyInFlight);
        }

        let config = manager.config();
        let mut headers = settings.headers;
        for (name, value) in &config.default_headers {
            if !headers.contains(name) {
                headers.insert(name.as_str(), value.as_str());
            }
        }
        if !headers.contains("User-Agent") && !config.user_agent.is_empty() {
            headers.insert("User-Agent", config.user_agent.as_str());
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(RequestSnapshot {
            id: inner.id,
            attempt: generation,
            url,
            verb,
            headers,
            options: settings.options,
            content: settings.content,
        });
        let plan = AttemptPlan {
            total_timeout: effective_timeout(settings.total_timeout, config.timeouts.total()),
            activity_timeout: effective_timeout(
                settings.activity_timeout,
                config.timeouts.activity(),
            ),
            mock_status: rules.mock_failures.find(&snapshot.url),
            snapshot,
        };

        inner.begin_attempt(generation, settings.policy, Some(plan.snapshot.clone()));
        manager.register(inner);

        tracing::info!(
            request_id = %inner.id,
            verb = %plan.snapshot.verb,
            url = %plan.snapshot.url,
            attempt = generation,
            "Dispatching request"
        );

        inner.post(move |inner| inner.start_attempt(generation, plan));
        Ok(())
    }

    /// Dispatch and block until the attempt finished.
    ///
    /// Refuses (returns false) when a completion delegate is bound, since the
    /// completion event can only have one consumer. Must not be called from a
    /// worker thread.
    pub fn process_request_until_complete(&self) -> bool {
        if read(&self.inner.delegates).completion.is_some() {
            tracing::warn!(
                request_id = %self.inner.id,
                "Blocking dispatch refused, a completion delegate is bound"
            );
            return false;
        }

        let (tx, rx) = mpsc::channel();
        {
            let mut state = lock(&self.inner.state);
            state.waiter = Some(tx);
            state.force_io_thread = true;
        }

        if !self.process_request() {
            let mut state = lock(&self.inner.state);
            state.waiter = None;
            state.force_io_thread = false;
            return false;
        }

        rx.recv().is_ok()
    }

    /// Cancel the request. Safe from any thread; the second call is a no-op.
    ///
    /// The completion delegate still fires, later, with `Cancelled` unless a
    /// more specific reason was already recorded.
    pub fn cancel_request(&self) {
        let inner = &self.inner;
        if inner.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!(request_id = %inner.id, "Request already cancelled");
            return;
        }

        lock(&inner.sink).take();
        tracing::info!(request_id = %inner.id, "Cancelling request");

        if inner.in_flight.load(Ordering::SeqCst) {
            let generation = inner.generation.load(Ordering::SeqCst);
            inner.post(move |inner| inner.abort(generation, AbortCause::Cancel));
            return;
        }

        // Not dispatched: claim a cancel-only attempt so the delegate still
        // reports the cancellation. A racing dispatch wins the claim and then
        // observes the flag during setup.
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if lock(&inner.state).status.is_finished() {
            inner.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let policy = self.delegate_thread_policy();
        inner.begin_attempt(generation, policy, None);
        if let Some(manager) = inner.manager.upgrade() {
            manager.register(inner);
        }
        inner.post(move |inner| inner.finish(generation, Finish::Aborted));
    }

    /// Return to `NotStarted` for another attempt, dropping the previous
    /// response and failure reason. Returns false while an attempt is in flight.
    pub fn reset(&self) -> bool {
        let inner = &self.inner;
        if inner.in_flight.load(Ordering::SeqCst) {
            tracing::warn!(request_id = %inner.id, "Cannot reset a request that is in flight");
            return false;
        }

        {
            let mut state = lock(&inner.state);
            state.status = RequestStatus::NotStarted;
            state.reason = FailureReason::None;
            state.started_at = None;
            state.finished_at = None;
            state.effective_url = None;
        }
        lock(&inner.response).take();
        lock(&inner.completed).take();
        *lock(&inner.last_progress) = (0, 0);
        inner.cancelled.store(false, Ordering::SeqCst);
        inner.aborted.store(false, Ordering::SeqCst);
        inner.activity_timed_out.store(false, Ordering::SeqCst);
        inner.bytes_sent.store(0, Ordering::SeqCst);
        inner.bytes_received.store(0, Ordering::SeqCst);
        true
    }

    /// Clear a previous attempt's total timeout mark so it can be dispatched
    /// again.
    pub fn reset_timeout_status(&self) {
        self.inner.timed_out.store(false, Ordering::SeqCst);
        self.inner.activity_timed_out.store(false, Ordering::SeqCst);
    }

    // -- observation --

    pub fn status(&self) -> RequestStatus {
        lock(&self.inner.state).status
    }

    pub fn failure_reason(&self) -> FailureReason {
        lock(&self.inner.state).reason
    }

    /// The finished attempt's response, or a copy of the partial one.
    pub fn response(&self) -> Option<Arc<HttpResponse>> {
        if let Some(done) = lock(&self.inner.completed).clone() {
            return Some(done);
        }
        lock(&self.inner.response).clone().map(Arc::new)
    }

    /// URL after redirects. Falls back to the configured URL.
    pub fn effective_url(&self) -> String {
        lock(&self.inner.state)
            .effective_url
            .clone()
            .unwrap_or_else(|| self.url())
    }

    /// Time since dispatch, frozen once the attempt finished.
    pub fn elapsed(&self) -> Duration {
        let state = lock(&self.inner.state);
        match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.is_in_flight()
    }

    /// Number of attempts dispatched so far.
    pub fn attempt(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Acquire)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Acquire)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("id", &self.inner.id)
            .field("url", &self.url())
            .field("status", &self.status())
            .finish()
    }
}

fn validate_url(raw: &str) -> Result<Url, DispatchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DispatchError::MissingUrl);
    }
    let url = Url::parse(raw).map_err(|e| DispatchError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DispatchError::UnsupportedScheme(other.to_string())),
    }
}

fn effective_timeout(
    request: Option<Duration>,
    default: Option<Duration>,
) -> Option<Duration> {
    match request {
        Some(d) if d.is_zero() => None,
        Some(d) => Some(d),
        None => default,
    }
}
