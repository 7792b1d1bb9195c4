//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to the composition root (client/)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ApiConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::ClientConfig;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::PushConfig;
pub use schema::RetryConfig;
