//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per logical request)
//!     → metrics.rs (counters, gauges, histograms)
//!     → reporter.rs (final failures handed to an error reporter)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Error reporter (tracing by default, in-memory for tests and tooling)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Correlation ID flows through every attempt of a logical call
//! - Metrics are cheap (atomic increments) and no-ops without an exporter
//! - Reporters are fire-and-forget and never fail the caller

pub mod logging;
pub mod metrics;
pub mod reporter;

pub use reporter::{ErrorContext, ErrorReporter, MemoryReporter, TracingReporter};
