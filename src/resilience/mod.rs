//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → timeouts.rs (one deadline per physical attempt)
//!     → On failure: classify.rs (transient or terminal?)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → circuit_breaker.rs (wraps the whole retrying call, opens on sustained failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Retries only for transient failures, bounded by a retry budget
//! - Circuit breaker prevents retry storms against a known-down dependency
//! - Breakers count fully-retried logical calls, not raw attempts

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use classify::FailureKind;
pub use retries::{RetryExecutor, RetryPolicy};
