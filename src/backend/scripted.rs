//! Deterministic scripted transport.
//!
//! Plays a fixed list of steps against the core on the worker runtime, with
//! no network I/O. Counts every contract call so callers can assert, for
//! example, that `abort_request` ran exactly once.
//!
//! ```text
//! Script::new()
//!     .wait(1s) .status(200) .header(..) .data(..) .stall()
//! ```

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::AbortHandle;

use super::{Backend, BackendContext, BackendFactory};
use crate::http::response::HttpResponse;
use crate::http::types::FailureReason;

/// One scripted transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Sleep before the next step.
    Wait(Duration),
    /// Report a status line.
    Status(u16),
    /// Report a response header.
    Header(String, String),
    /// Report response content.
    Data(Vec<u8>),
    /// Read the whole request body and report it as sent.
    SendBody,
    /// Report a redirect target.
    Redirect(String),
    /// Finish successfully.
    Complete,
    /// Finish with a failure.
    Fail(FailureReason),
    /// Never finish on its own.
    Stall,
}

/// Steps plus transport properties. Running out of steps completes.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    refuse_setup: bool,
    native_activity_timeout: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// A script answering `status` with `body` immediately.
    pub fn respond(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new().status(status).data(body).complete()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn wait(self, delay: Duration) -> Self {
        self.step(Step::Wait(delay))
    }

    pub fn status(self, status: u16) -> Self {
        self.step(Step::Status(status))
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.step(Step::Header(name.into(), value.into()))
    }

    pub fn data(self, data: impl Into<Vec<u8>>) -> Self {
        self.step(Step::Data(data.into()))
    }

    pub fn send_body(self) -> Self {
        self.step(Step::SendBody)
    }

    pub fn redirect(self, url: impl Into<String>) -> Self {
        self.step(Step::Redirect(url.into()))
    }

    pub fn complete(self) -> Self {
        self.step(Step::Complete)
    }

    pub fn fail(self, reason: FailureReason) -> Self {
        self.step(Step::Fail(reason))
    }

    pub fn stall(self) -> Self {
        self.step(Step::Stall)
    }

    /// `setup_request` returns false.
    pub fn refuse_setup(mut self) -> Self {
        self.refuse_setup = true;
        self
    }

    /// Report a native activity timeout, disabling the core's own.
    pub fn native_activity_timeout(mut self) -> Self {
        self.native_activity_timeout = true;
        self
    }
}

/// Contract calls observed across every backend of a factory.
#[derive(Debug, Default)]
pub struct BackendCalls {
    created: AtomicUsize,
    setups: AtomicUsize,
    aborts: AtomicUsize,
    cleanups: AtomicUsize,
    mocks: AtomicUsize,
    threaded_ticks: AtomicUsize,
    abort_thread: Mutex<Option<String>>,
}

impl BackendCalls {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn mocks(&self) -> usize {
        self.mocks.load(Ordering::SeqCst)
    }

    pub fn threaded_ticks(&self) -> usize {
        self.threaded_ticks.load(Ordering::SeqCst)
    }

    /// Name of the thread the latest `abort_request` ran on.
    pub fn abort_thread(&self) -> Option<String> {
        self.abort_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Factory handing every attempt the current script.
pub struct ScriptedBackendFactory {
    script: ArcSwap<Script>,
    calls: Arc<BackendCalls>,
}

impl ScriptedBackendFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: ArcSwap::from_pointee(script),
            calls: Arc::new(BackendCalls::default()),
        }
    }

    /// Script used by attempts set up from now on.
    pub fn set_script(&self, script: Script) {
        self.script.store(Arc::new(script));
    }

    pub fn calls(&self) -> Arc<BackendCalls> {
        self.calls.clone()
    }
}

impl BackendFactory for ScriptedBackendFactory {
    fn create_backend(&self) -> Box<dyn Backend> {
        self.calls.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedBackend {
            script: self.script.load_full(),
            calls: self.calls.clone(),
            task: Mutex::new(None),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Backend for one attempt.
pub struct ScriptedBackend {
    script: Arc<Script>,
    calls: Arc<BackendCalls>,
    task: Mutex<Option<AbortHandle>>,
}

impl ScriptedBackend {
    fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Backend for ScriptedBackend {
    fn setup_request(&self, ctx: BackendContext) -> bool {
        self.calls.setups.fetch_add(1, Ordering::SeqCst);
        if self.script.refuse_setup {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let steps = self.script.steps.clone();
        let task = runtime.spawn(play(steps, ctx));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
        true
    }

    fn abort_request(&self) {
        *self
            .calls
            .abort_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            std::thread::current().name().map(str::to_string);
        self.calls.aborts.fetch_add(1, Ordering::SeqCst);
        self.stop();
    }

    fn cleanup_request(&self) {
        self.calls.cleanups.fetch_add(1, Ordering::SeqCst);
        self.stop();
    }

    fn mock_response_data(&self, response: &mut HttpResponse, status: u16) {
        self.calls.mocks.fetch_add(1, Ordering::SeqCst);
        response.set_status(status);
        response.append_header("Content-Type", "text/plain");
        response.append_content(format!("mock response {}", status).as_bytes());
    }

    fn tick_threaded(&self) {
        self.calls.threaded_ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn has_native_activity_timeout(&self) -> bool {
        self.script.native_activity_timeout
    }
}

async fn play(steps: Vec<Step>, ctx: BackendContext) {
    for step in steps {
        match step {
            Step::Wait(delay) => tokio::time::sleep(delay).await,
            Step::Status(status) => ctx.on_status(status),
            Step::Header(name, value) => ctx.on_header(&name, &value),
            Step::Data(data) => {
                if !ctx.on_data(&data) {
                    return;
                }
            }
            Step::SendBody => {
                let sent = ctx.open_content().and_then(|mut reader| {
                    let mut body = Vec::new();
                    reader.read_to_end(&mut body).map(|_| body.len() as u64)
                });
                match sent {
                    Ok(sent) => ctx.on_bytes_sent(sent),
                    Err(e) => {
                        tracing::debug!(error = %e, "Scripted upload could not be read");
                        ctx.fail(FailureReason::Other);
                        return;
                    }
                }
            }
            Step::Redirect(url) => ctx.on_effective_url(&url),
            Step::Complete => {
                ctx.complete();
                return;
            }
            Step::Fail(reason) => {
                ctx.fail(reason);
                return;
            }
            Step::Stall => std::future::pending::<()>().await,
        }
    }
    ctx.complete();
}
