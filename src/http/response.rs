//! Response assembled progressively during an attempt.
//!
//! # Responsibilities
//! - Hold status code, headers and content as the backend reports them
//! - Stay readable (possibly partial) after cancellation or timeout
//! - Carry a copy of the attempt's failure reason
//!
//! # Design Decisions
//! - Status `0` means no status line was observed yet
//! - Content is only buffered when no streaming sink is attached; otherwise
//!   just the byte count is tracked
//! - Frozen into an `Arc` at finish, so delegates can keep it past the request

use std::time::Duration;

use crate::http::headers::HeaderMap;
use crate::http::types::FailureReason;

/// Outcome record of one attempt.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    content: Vec<u8>,
    streamed_bytes: u64,
    url: String,
    effective_url: String,
    failure_reason: FailureReason,
}

impl HttpResponse {
    /// Create an empty response for a request URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            effective_url: url.clone(),
            url,
            ..Default::default()
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Content-Type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Buffered content. Empty when content went to a streaming sink.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_as_string(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn append_content(&mut self, data: &[u8]) {
        self.content.extend_from_slice(data);
    }

    pub(crate) fn record_streamed(&mut self, len: usize) {
        self.streamed_bytes += len as u64;
    }

    /// Number of content bytes received, buffered or streamed.
    pub fn content_length(&self) -> u64 {
        self.content.len() as u64 + self.streamed_bytes
    }

    /// The URL the request was sent to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL after redirects.
    pub fn effective_url(&self) -> &str {
        &self.effective_url
    }

    pub fn set_effective_url(&mut self, url: impl Into<String>) {
        self.effective_url = url.into();
    }

    pub fn failure_reason(&self) -> FailureReason {
        self.failure_reason
    }

    pub(crate) fn set_failure_reason(&mut self, reason: FailureReason) {
        self.failure_reason = reason;
    }

    /// Delay requested by a `Retry-After` header given in seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("Retry-After")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}
