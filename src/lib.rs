//! HTTP request lifecycle controller.
//!
//! Manages outbound HTTP requests end to end: configuration, dispatch to a
//! pluggable transport backend, racing Total and Activity timeouts,
//! idempotent cancellation, retries, and a configurable delegate thread
//! policy. Every dispatched attempt finishes exactly once.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller thread                        I/O worker (tokio runtime)
//!  ┌─────────────────────┐              ┌──────────────────────────────────┐
//!  │ HttpRequest         │  setup/abort │ request: start_attempt / abort   │
//!  │  process_request ───┼─────────────▶│   Backend::setup_request         │
//!  │  cancel_request  ───┼─────────────▶│   Total + Activity timers        │
//!  │                     │              │                                  │
//!  │ HttpManager::tick ◀─┼── queued ────│ finish (once) ──▶ Dispatcher      │
//!  │  (delegates)        │  delegates   │        │ inline (IoThread policy)│
//!  └─────────────────────┘              │        ▼                         │
//!                                       │ Backend I/O ─▶ BackendContext     │
//!                                       │  status / headers / data / done  │
//!                                       └──────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use http_lifecycle::backend::reqwest::ReqwestBackendFactory;
//! use http_lifecycle::{HttpConfig, HttpManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = HttpManager::new(HttpConfig::default(), Arc::new(ReqwestBackendFactory::new()?))?;
//! let request = manager.create_request();
//! request.set_url("https://example.com/");
//! if request.process_request_until_complete() {
//!     println!("{:?}", request.response().map(|r| r.status()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod http;
pub mod manager;
pub mod observability;
pub mod request;
pub mod resilience;
pub mod routing;

pub use backend::{Backend, BackendContext, BackendFactory};
pub use config::HttpConfig;
pub use http::{ContentSource, DelegateThreadPolicy, FailureReason, HeaderMap, HttpResponse, RequestStatus};
pub use manager::{HttpManager, HttpStats, SchedulerError};
pub use request::{DispatchError, HttpRequest, RequestSnapshot};
pub use resilience::{RetryPolicy, RetryingRequest};
