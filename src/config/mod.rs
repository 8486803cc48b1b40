//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HttpConfig (validated, immutable)
//!     → HttpManager::new / HttpManager::set_config
//!     → atomic swap of Arc<HttpConfig>
//!     → requests read defaults at dispatch time
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes swap the whole value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - In-flight attempts keep the values they were dispatched with

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::HttpConfig;
pub use schema::ObservabilityConfig;
pub use schema::RetryConfig;
pub use schema::TimeoutConfig;
