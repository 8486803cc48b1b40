//! HTTP manager.
//!
//! # Responsibilities
//! - Own the I/O worker context and the backend factory
//! - Hold the active configuration and the routing rules derived from it
//! - Track in-flight requests and aggregate stats
//! - Drive periodic ticks: caller-side (`tick`) and worker-side (ticker task)
//!
//! # Data Flow
//! ```text
//! HttpManager::new(config, factory)
//!     → Scheduler (tokio runtime) + ticker task → tick_threaded()
//! HttpRequest::process_request()
//!     → register (Weak) → worker setup → ... → finish → unregister
//!     → Dispatcher: inline on worker, or queued for HttpManager::tick()
//! ```
//!
//! # Design Decisions
//! - No global instance: every request is bound to the manager it was
//!   created from, so tests run isolated managers side by side
//! - Requests hold the manager weakly; dropping the last manager handle
//!   cancels whatever is still in flight and delivers queued delegates inline
//! - Configuration swaps are atomic (`ArcSwap`); in-flight attempts keep the
//!   values they were dispatched with

mod dispatcher;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::{Backend, BackendFactory};
use crate::config::HttpConfig;
use crate::http::types::DelegateThreadPolicy;
use crate::observability::metrics;
use crate::request::{HttpRequest, RequestInner};
use crate::routing::{DomainAllowList, MockFailureRules};

pub(crate) use dispatcher::{Delivery, Dispatcher};
pub use scheduler::{Scheduler, SchedulerError, TaskHandle, TimerSlot};

/// Routing rules derived from the active configuration.
#[derive(Debug, Default)]
pub(crate) struct RoutingRules {
    pub(crate) allowed: DomainAllowList,
    pub(crate) mock_failures: MockFailureRules,
}

impl RoutingRules {
    fn from_config(config: &HttpConfig) -> Self {
        let mock_failures = match MockFailureRules::parse(&config.mock_failure_patterns) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid mock failure patterns");
                MockFailureRules::default()
            }
        };
        if !mock_failures.is_empty() {
            tracing::warn!(
                patterns = %config.mock_failure_patterns,
                "Mock failure patterns active"
            );
        }

        Self {
            allowed: DomainAllowList::new(config.allowed_domains.iter().cloned()),
            mock_failures,
        }
    }
}

/// Snapshot of manager counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HttpStats {
    /// Attempts dispatched and not yet finished.
    pub in_flight: usize,
    /// Highest `in_flight` value observed.
    pub max_in_flight: usize,
    /// Attempts that finished successfully.
    pub completed: u64,
    /// Attempts that finished with a failure reason.
    pub failed: u64,
    /// Delegates waiting for the next `tick`.
    pub pending_delegates: usize,
}

#[derive(Debug, Default)]
struct StatsCounters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    /// Attempts unregistered whose delegate is not handed off yet.
    finishing: AtomicUsize,
}

pub(crate) struct ManagerShared {
    scheduler: Scheduler,
    config: ArcSwap<HttpConfig>,
    rules: ArcSwap<RoutingRules>,
    factory: Arc<dyn BackendFactory>,
    requests: DashMap<Uuid, Weak<RequestInner>>,
    dispatcher: Dispatcher,
    stats: StatsCounters,
    accepting: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn config(&self) -> Arc<HttpConfig> {
        self.config.load_full()
    }

    pub(crate) fn rules(&self) -> Arc<RoutingRules> {
        self.rules.load_full()
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(crate) fn create_backend(&self) -> Box<dyn Backend> {
        self.factory.create_backend()
    }

    pub(crate) fn register(&self, request: &Arc<RequestInner>) {
        self.requests.insert(request.id(), Arc::downgrade(request));
        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.max_in_flight.fetch_max(in_flight, Ordering::AcqRel);
        metrics::record_in_flight(in_flight);
    }

    /// Unregister a finished attempt. Must be followed by
    /// [`deliver_completion`](Self::deliver_completion).
    pub(crate) fn request_finished(&self, id: Uuid, succeeded: bool) {
        self.stats.finishing.fetch_add(1, Ordering::AcqRel);
        self.unregister(id);
        if succeeded {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn deliver_completion(&self, policy: DelegateThreadPolicy, delivery: Delivery) {
        self.dispatcher.deliver(policy, delivery);
        self.stats.finishing.fetch_sub(1, Ordering::AcqRel);
    }

    /// A request was dropped by its owner while in flight.
    pub(crate) fn request_dropped(&self, id: Uuid) {
        self.unregister(id);
    }

    fn unregister(&self, id: Uuid) {
        if self.requests.remove(&id).is_some() {
            let in_flight = self
                .stats
                .in_flight
                .fetch_sub(1, Ordering::AcqRel)
                .saturating_sub(1);
            metrics::record_in_flight(in_flight);
        }
    }

    fn live_requests(&self) -> Vec<Arc<RequestInner>> {
        self.requests
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    fn tick_threaded(&self) {
        for request in self.live_requests() {
            request.sample_progress(DelegateThreadPolicy::CompleteOnIoThread);
            request.tick_backend(true);
        }
    }
}

impl Drop for ManagerShared {
    fn drop(&mut self) {
        let orphans = self.live_requests();
        self.requests.clear();
        if !orphans.is_empty() {
            tracing::warn!(
                count = orphans.len(),
                "HTTP manager dropped with requests in flight, cancelling"
            );
        }
        for request in orphans {
            request.teardown();
        }

        // Nobody is left to tick; deliver what finished attempts queued.
        let delivered = self.dispatcher.drain();
        if delivered > 0 {
            tracing::debug!(delivered, "Delivered queued delegates on manager drop");
        }
    }
}

/// Handle to the HTTP manager. Cloning shares the same worker context.
#[derive(Clone)]
pub struct HttpManager {
    shared: Arc<ManagerShared>,
}

impl HttpManager {
    /// Start a manager with the given configuration and transport.
    pub fn new(
        config: HttpConfig,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, SchedulerError> {
        let scheduler = Scheduler::new(config.worker_threads)?;
        let rules = RoutingRules::from_config(&config);
        let tick_interval = config.tick_interval();

        tracing::info!(
            backend = factory.name(),
            worker_threads = config.worker_threads,
            tick_interval_ms = tick_interval.as_millis() as u64,
            "HTTP manager starting"
        );

        let shared = Arc::new(ManagerShared {
            scheduler,
            config: ArcSwap::from_pointee(config),
            rules: ArcSwap::from_pointee(rules),
            factory,
            requests: DashMap::new(),
            dispatcher: Dispatcher::new(),
            stats: StatsCounters::default(),
            accepting: AtomicBool::new(true),
        });
        spawn_ticker(&shared, tick_interval);

        Ok(Self { shared })
    }

    pub(crate) fn from_shared(shared: Arc<ManagerShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerShared> {
        Arc::downgrade(&self.shared)
    }

    /// Create a request bound to this manager.
    pub fn create_request(&self) -> HttpRequest {
        HttpRequest::new(self)
    }

    pub fn config(&self) -> Arc<HttpConfig> {
        self.shared.config()
    }

    /// Swap the active configuration. Applies to attempts dispatched after
    /// the call; worker count and tick interval are fixed at startup.
    pub fn set_config(&self, config: HttpConfig) {
        let rules = RoutingRules::from_config(&config);
        self.shared.rules.store(Arc::new(rules));
        self.shared.config.store(Arc::new(config));
        tracing::info!("HTTP configuration updated");
    }

    /// Run `task` on the worker once `delay` elapsed.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.scheduler.schedule_after(delay, task)
    }

    /// Runtime handle of the worker context.
    pub fn runtime_handle(&self) -> &tokio::runtime::Handle {
        self.shared.scheduler.handle()
    }

    /// Deliver delegates queued for the caller's thread and sample progress of
    /// caller-thread requests. Returns the number of queued deliveries run.
    pub fn tick(&self) -> usize {
        for request in self.shared.live_requests() {
            request.sample_progress(DelegateThreadPolicy::CompleteOnCallerThread);
            request.tick_backend(false);
        }
        self.shared.dispatcher.drain()
    }

    pub fn stats(&self) -> HttpStats {
        let stats = &self.shared.stats;
        HttpStats {
            in_flight: stats.in_flight.load(Ordering::Acquire),
            max_in_flight: stats.max_in_flight.load(Ordering::Acquire),
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            pending_delegates: self.shared.dispatcher.pending()
                + stats.finishing.load(Ordering::Acquire),
        }
    }

    /// Number of requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.shared.requests.len()
    }

    /// Tick until nothing is in flight and no delegate is queued, or until
    /// `timeout` elapsed. Returns true if everything drained.
    ///
    /// Blocks the calling thread; must not be called from a worker.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let pause = self.config().tick_interval().min(Duration::from_millis(5));
        loop {
            self.tick();
            let stats = self.stats();
            if stats.in_flight == 0 && stats.pending_delegates == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    in_flight = stats.in_flight,
                    pending = stats.pending_delegates,
                    "Flush timed out"
                );
                return false;
            }
            std::thread::sleep(pause);
        }
    }

    /// Stop accepting new requests and cancel every request in flight.
    ///
    /// Completion delegates of cancelled requests still fire. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.accepting.swap(false, Ordering::SeqCst) {
            return;
        }

        let active = self.shared.live_requests();
        tracing::info!(in_flight = active.len(), "HTTP manager shutting down");
        for request in active {
            HttpRequest::from_inner(request).cancel_request();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        !self.shared.is_accepting()
    }
}

impl std::fmt::Debug for HttpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpManager")
            .field("backend", &self.shared.factory.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Periodic worker-side tick. Stops when the manager is gone or shut down.
fn spawn_ticker(shared: &Arc<ManagerShared>, interval: Duration) {
    let weak = Arc::downgrade(shared);
    let mut shutdown = shared.scheduler.subscribe_shutdown();

    shared.scheduler.spawn_future(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    shared.tick_threaded();
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}
