//! HTTP data types shared by the core and backends.
//!
//! # Responsibilities
//! - **`types`**: status, failure reason and delegate thread policy enums
//! - **`headers`**: case-insensitive header map
//! - **`content`**: request body sources and response sinks
//! - **`response`**: the progressively filled response record

pub mod content;
pub mod headers;
pub mod response;
pub mod types;

pub use content::{ContentReader, ContentSource, ResponseSink};
pub use headers::HeaderMap;
pub use response::HttpResponse;
pub use types::{DelegateThreadPolicy, FailureReason, RequestStatus};
