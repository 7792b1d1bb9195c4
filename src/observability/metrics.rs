//! Metrics collection and exposition.
//!
//! # Metrics
//! - `link_requests_total` (counter): logical requests by method, status
//! - `link_request_duration_seconds` (histogram): latency including retries
//! - `link_retries_total` (counter): retries by dependency, failure kind
//! - `link_retry_exhausted_total` (counter): calls that spent the whole budget
//! - `link_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `link_circuit_rejections_total` (counter): calls failed fast
//! - `link_push_state` (gauge): 0=closed, 1=connecting, 2=reconnecting, 3=open
//! - `link_push_frames_total` (counter): inbound frames by outcome
//! - `link_reported_errors_total` (counter): reports by label
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality (no URLs, no correlation IDs)

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::push::ConnectionState;
use crate::resilience::{CircuitState, FailureKind};

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished logical request. `status` is `None` when no response arrived.
pub fn record_request(method: &str, status: Option<u16>, start: Instant) {
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
    ::metrics::counter!("link_requests_total", "method" => method.to_string(), "status" => status).increment(1);
    ::metrics::histogram!("link_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(dependency: &str, kind: FailureKind) {
    ::metrics::counter!("link_retries_total", "dependency" => dependency.to_string(), "kind" => kind.as_str())
        .increment(1);
}

pub fn record_retry_exhausted(dependency: &str) {
    ::metrics::counter!("link_retry_exhausted_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_circuit_state(dependency: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("link_circuit_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_circuit_rejection(dependency: &str) {
    ::metrics::counter!("link_circuit_rejections_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_push_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Closed => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Reconnecting => 2.0,
        ConnectionState::Open => 3.0,
    };
    ::metrics::gauge!("link_push_state").set(value);
}

/// `outcome` is one of `dispatched`, `unknown`, `malformed`.
pub fn record_push_frame(outcome: &'static str) {
    ::metrics::counter!("link_push_frames_total", "outcome" => outcome).increment(1);
}

pub fn record_reported_error(label: &'static str) {
    ::metrics::counter!("link_reported_errors_total", "label" => label).increment(1);
}
