//! Transport backends.
//!
//! # Responsibilities
//! - Define the contract every transport satisfies
//! - Provide a factory so the transport is chosen once, when the manager
//!   starts
//!
//! # Data Flow
//! ```text
//! worker: setup_request(ctx) ──► transport I/O (any thread)
//!                                   │
//!            ctx.on_status / on_header / on_data / on_bytes_sent
//!                                   │
//!            ctx.complete() / ctx.fail(reason) ──► finish posted to worker
//! worker: abort_request()  (cancel, timeouts)
//! worker: cleanup_request() exactly once per attempt
//! ```
//!
//! # Design Decisions
//! - One backend instance per attempt, so state never leaks across retries
//! - `abort_request` must be idempotent and safe after completion
//! - Backends only talk to the core through [`BackendContext`]; a stale
//!   context (finished attempt, dropped request) turns every call into a no-op

pub mod reqwest;
pub mod scripted;

use crate::http::response::HttpResponse;
pub use crate::request::events::{BackendContext, RequestSnapshot};

/// A transport implementation driving one attempt.
pub trait Backend: Send + Sync {
    /// Create the response record for this attempt.
    fn create_response(&self, ctx: &BackendContext) -> HttpResponse {
        HttpResponse::new(ctx.request().url.as_str())
    }

    /// Begin I/O. Returning false fails the attempt with a connection error.
    ///
    /// Called on the worker. Must not block on network I/O.
    fn setup_request(&self, ctx: BackendContext) -> bool;

    /// Best-effort cancellation of in-flight I/O.
    fn abort_request(&self);

    /// Release transport resources. Called exactly once per attempt.
    fn cleanup_request(&self) {}

    /// Fill a synthetic response without performing I/O.
    fn mock_response_data(&self, response: &mut HttpResponse, status: u16) {
        response.set_status(status);
    }

    /// Periodic evaluation on the caller's thread.
    fn tick(&self) {}

    /// Periodic evaluation on the worker.
    fn tick_threaded(&self) {}

    /// True if the transport enforces its own activity timeout.
    fn has_native_activity_timeout(&self) -> bool {
        false
    }
}

/// Creates a backend for every attempt.
pub trait BackendFactory: Send + Sync {
    fn create_backend(&self) -> Box<dyn Backend>;

    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> BackendFactory for F
where
    F: Fn() -> Box<dyn Backend> + Send + Sync,
{
    fn create_backend(&self) -> Box<dyn Backend> {
        self()
    }
}
