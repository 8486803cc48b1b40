//! The path from a backend into the core.
//!
//! # Responsibilities
//! - Give the backend a read-only snapshot of the request
//! - Fold status, headers and content into the attempt's response
//! - Push the activity deadline on every observed progress
//! - Deliver status and header delegates through the dispatcher
//! - Post completion and failure onto the worker
//!
//! # Design Decisions
//! - The context holds a `Weak` request and the attempt generation; once the
//!   request is dropped or the attempt finished, every call is a no-op
//! - Progress counters are atomics so the hot data path takes no state lock

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use url::Url;
use uuid::Uuid;

use super::{lock, read, Finish, HttpRequest, RequestInner};
use crate::http::content::{ContentReader, ContentSource};
use crate::http::headers::HeaderMap;
use crate::http::response::HttpResponse;
use crate::http::types::FailureReason;

/// Immutable view of the request as dispatched.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub id: Uuid,
    pub attempt: u64,
    pub url: Url,
    pub verb: String,
    /// Caller headers plus configured defaults and User-Agent.
    pub headers: HeaderMap,
    pub options: BTreeMap<String, String>,
    pub content: ContentSource,
}

/// Handle a backend uses to report on one attempt.
#[derive(Clone)]
pub struct BackendContext {
    request: Weak<RequestInner>,
    generation: u64,
    snapshot: Arc<RequestSnapshot>,
}

impl BackendContext {
    pub(crate) fn new(
        request: Weak<RequestInner>,
        generation: u64,
        snapshot: Arc<RequestSnapshot>,
    ) -> Self {
        Self {
            request,
            generation,
            snapshot,
        }
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open the request body for this attempt.
    pub fn open_content(&self) -> io::Result<ContentReader> {
        self.snapshot.content.open()
    }

    /// True while the attempt can still be reported on.
    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }

    /// True once the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.request
            .upgrade()
            .is_some_and(|inner| inner.cancelled.load(Ordering::SeqCst))
    }

    fn live(&self) -> Option<Arc<RequestInner>> {
        let inner = self.request.upgrade()?;
        inner.is_live(self.generation).then_some(inner)
    }

    /// Run `f` against the attempt's response, creating it on first use.
    fn with_response<R>(
        &self,
        inner: &Arc<RequestInner>,
        f: impl FnOnce(&mut HttpResponse) -> R,
    ) -> R {
        let missing = lock(&inner.response).is_none();
        let created = if missing {
            inner
                .current_backend()
                .map(|backend| backend.create_response(self))
        } else {
            None
        };

        let mut slot = lock(&inner.response);
        let response = slot.get_or_insert_with(|| {
            created.unwrap_or_else(|| HttpResponse::new(self.snapshot.url.as_str()))
        });
        f(response)
    }

    /// Status line received.
    pub fn on_status(&self, status: u16) {
        let Some(inner) = self.live() else {
            return;
        };
        self.with_response(&inner, |r| r.set_status(status));
        inner.touch_activity();

        tracing::debug!(request_id = %inner.id, status, "Status received");

        if let Some(delegate) = read(&inner.delegates).status.clone() {
            notify(&inner, move |request| delegate(request, status));
        };
    }

    /// Response header received. Repeated names are joined.
    pub fn on_header(&self, name: &str, value: &str) {
        let Some(inner) = self.live() else {
            return;
        };
        self.with_response(&inner, |r| r.append_header(name, value));
        inner.touch_activity();

        if let Some(delegate) = read(&inner.delegates).header.clone() {
            let (name, value) = (name.to_string(), value.to_string());
            notify(&inner, move |request| delegate(request, &name, &value));
        };
    }

    /// Response content received.
    ///
    /// Returns false when the backend should stop reading: the attempt is no
    /// longer live or was cancelled, or the streaming sink failed.
    pub fn on_data(&self, data: &[u8]) -> bool {
        let Some(inner) = self.live() else {
            return false;
        };
        if inner.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        inner.touch_activity();
        inner
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::AcqRel);

        let streamed = {
            let mut sink = lock(&inner.sink);
            match sink.as_mut() {
                Some(sink) => Some(sink.write_all(data)),
                None => None,
            }
        };

        match streamed {
            Some(Ok(())) => {
                self.with_response(&inner, |r| r.record_streamed(data.len()));
                true
            }
            Some(Err(e)) => {
                tracing::warn!(request_id = %inner.id, error = %e, "Response sink write failed");
                lock(&inner.sink).take();
                self.fail(FailureReason::Other);
                false
            }
            None => {
                self.with_response(&inner, |r| r.append_content(data));
                true
            }
        }
    }

    /// Total request body bytes sent so far.
    pub fn on_bytes_sent(&self, total: u64) {
        let Some(inner) = self.live() else {
            return;
        };
        let previous = inner.bytes_sent.fetch_max(total, Ordering::AcqRel);
        if total > previous {
            inner.touch_activity();
        }
    }

    /// The transport followed a redirect.
    pub fn on_effective_url(&self, url: &str) {
        let Some(inner) = self.live() else {
            return;
        };
        lock(&inner.state).effective_url = Some(url.to_string());
        self.with_response(&inner, |r| r.set_effective_url(url));
    }

    /// The transport received the full response.
    pub fn complete(&self) {
        self.post_finish(Finish::Completed);
    }

    /// The transport failed.
    pub fn fail(&self, reason: FailureReason) {
        let reason = if reason.is_none() {
            FailureReason::Other
        } else {
            reason
        };
        self.post_finish(Finish::Failed(reason));
    }

    fn post_finish(&self, finish: Finish) {
        let Some(inner) = self.request.upgrade() else {
            return;
        };
        let generation = self.generation;
        inner.post(move |inner| inner.finish(generation, finish));
    }
}

/// Hand a per-event delegate to the dispatcher under the attempt's policy.
fn notify<F>(inner: &Arc<RequestInner>, delegate: F)
where
    F: FnOnce(&HttpRequest) + Send + 'static,
{
    let Some(manager) = inner.manager.upgrade() else {
        return;
    };
    let target = inner.clone();
    manager.dispatcher().deliver(
        inner.attempt_policy(),
        Box::new(move || delegate(&HttpRequest::from_inner(target))),
    );
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("request_id", &self.snapshot.id)
            .field("generation", &self.generation)
            .finish()
    }
}
