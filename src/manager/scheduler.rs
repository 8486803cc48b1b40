//! I/O worker context.
//!
//! # Responsibilities
//! - Own the tokio runtime every setup, abort, finish and timer runs on
//! - Accept immediate and delayed callables from any thread
//! - Hand out abortable handles for delayed work
//!
//! # Design Decisions
//! - One multi-thread runtime per manager, so isolated managers never share
//!   workers
//! - Dropping the scheduler never blocks: `shutdown_background` lets the last
//!   reference go away on a worker thread without panicking
//! - Long-running tasks subscribe to a broadcast shutdown signal

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

/// Errors starting the worker context.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker thread count must be at least 1")]
    NoWorkers,

    #[error("failed to start I/O worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Background worker context.
pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: Handle,
    shutdown: broadcast::Sender<()>,
}

impl Scheduler {
    /// Start a worker runtime with the given number of threads.
    pub fn new(worker_threads: usize) -> Result<Self, SchedulerError> {
        if worker_threads == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("http-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            runtime: Some(runtime),
            handle,
            shutdown,
        })
    }

    /// Runtime handle, for backends that drive async I/O.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a callable on the worker as soon as possible.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { task() });
    }

    /// Run a future on the worker.
    pub fn spawn_future<F>(&self, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            abort: self.handle.spawn(future).abort_handle(),
        }
    }

    /// Run a callable on the worker once `delay` elapsed.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_future(async move {
            tokio::time::sleep(delay).await;
            task();
        })
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signal long-running tasks to stop.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.trigger_shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to scheduled work. Dropping it does not cancel the work.
#[derive(Debug)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    /// Cancel the work if it has not run yet. Idempotent.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A slot holding at most one outstanding timer.
///
/// Arming replaces (and cancels) the previous timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    slot: Mutex<Option<TaskHandle>>,
}

impl TimerSlot {
    pub fn arm(&self, handle: TaskHandle) {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Cancel the outstanding timer. Returns true if one was armed.
    pub fn cancel(&self) -> bool {
        let current = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match current {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
