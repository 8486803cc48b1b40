//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request lifecycle produces:
//!     → logging.rs (structured log events, request_id on every line)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Whatever metrics recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - Request ID flows through every lifecycle event
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
