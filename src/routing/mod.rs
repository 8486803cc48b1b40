//! URL routing decisions made before any I/O.
//!
//! # Data Flow
//! ```text
//! process_request(url)
//!     → matcher.rs DomainAllowList (reject disallowed hosts)
//!     → matcher.rs MockFailureRules (short-circuit to a canned outcome)
//!     → backend setup
//! ```
//!
//! # Design Decisions
//! - Rules are parsed from configuration once per config swap
//! - Matching is host based; paths and schemes are not considered

pub mod matcher;

pub use matcher::{DomainAllowList, HostMatcher, Matcher, MockFailureRules};
