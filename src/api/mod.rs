//! Request/response subsystem.
//!
//! # Data Flow
//! ```text
//! ApiRequest (caller)
//!     → pipeline.rs outbound: bearer credential, correlation id, hooks
//!     → transport.rs (one physical attempt, one deadline)
//!     → pipeline.rs inbound:
//!         401        → clear session, redirect to login, AuthExpired
//!         retryable  → CircuitBreaker("api") ∘ RetryExecutor, once per logical call
//!         otherwise  → report, return unchanged
//! ```
//!
//! # Design Decisions
//! - The pipeline is transport-agnostic; only status-code semantics matter
//! - Attempt metadata is an immutable value threaded through the retry loop
//! - The correlation id is stable across every attempt of a logical call

pub mod pipeline;
pub mod request;
pub mod transport;

pub use pipeline::{RequestPipeline, API_DEPENDENCY};
pub use request::{ApiRequest, ApiResponse, AttemptContext, RequestDescriptor, X_REQUEST_ID};
pub use transport::{HttpTransport, Transport};
