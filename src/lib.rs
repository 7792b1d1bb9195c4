//! Resilient client communication layer for the freight marketplace.
//!
//! Two independent channels share one session:
//! - [`api::RequestPipeline`]: REST calls with credential injection,
//!   correlation ids, failure classification, retry with backoff and a
//!   per-dependency circuit breaker
//! - [`push::ConnectionManager`] + [`push::EventDispatcher`]: a persistent
//!   websocket whose events fan out to independently registered subscribers

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod push;
pub mod resilience;
pub mod session;

pub use client::FreightClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, PushError};
