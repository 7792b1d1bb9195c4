//! Failure classification.
//!
//! # Responsibilities
//! - Decide whether a failure is transient (worth retrying) or terminal
//! - Decide whether a failure reflects dependency health (circuit accounting)
//!
//! # Design Decisions
//! - Network errors and timeouts are always transient
//! - Statuses are transient only when listed in the retry policy
//! - 401 is never retried; it is a credential problem, not a health problem
//! - Unknown failures are terminal (do not hammer an unknown failure mode)

use std::collections::BTreeSet;

use crate::error::ClientError;

/// Statuses retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Error message fragments treated as network-level failures by default.
pub const DEFAULT_RETRYABLE_SIGNATURES: [&str; 4] = ["network error", "timeout", "econnreset", "etimedout"];

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No response, timeout or connection reset.
    TransientNetwork,
    /// Retryable status (5xx, 408, 429 by default).
    TransientServer,
    /// 401; terminal, wipes the session.
    AuthExpired,
    /// Any other 4xx; retrying cannot help.
    ClientRequest,
    /// Dependency is known-down.
    CircuitOpen,
    /// Anything else. Not retried.
    Unclassified,
}

impl FailureKind {
    /// Whether a failure of this kind may be retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::TransientNetwork | FailureKind::TransientServer)
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::TransientServer => "transient_server",
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::ClientRequest => "client_request",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Unclassified => "unclassified",
        }
    }
}

/// Classify a failure against the given retryable statuses and message signatures.
pub fn classify(error: &ClientError, retryable_statuses: &BTreeSet<u16>, signatures: &[String]) -> FailureKind {
    match error {
        ClientError::Network { .. } | ClientError::Timeout(_) => FailureKind::TransientNetwork,
        ClientError::AuthExpired => FailureKind::AuthExpired,
        ClientError::Http { status: 401, .. } => FailureKind::AuthExpired,
        ClientError::Http { status, .. } if retryable_statuses.contains(status) => FailureKind::TransientServer,
        ClientError::Http { status, .. } if (400..500).contains(status) => FailureKind::ClientRequest,
        ClientError::Http { .. } => FailureKind::Unclassified,
        ClientError::CircuitOpen { .. } => FailureKind::CircuitOpen,
        ClientError::Transport(message) if matches_signature(message, signatures) => FailureKind::TransientNetwork,
        ClientError::Transport(_)
        | ClientError::InvalidRequest(_)
        | ClientError::InvalidConfig(_)
        | ClientError::Decode(_) => FailureKind::Unclassified,
    }
}

/// Shorthand for `classify(..).is_retryable()`.
pub fn is_retryable(error: &ClientError, retryable_statuses: &BTreeSet<u16>, signatures: &[String]) -> bool {
    classify(error, retryable_statuses, signatures).is_retryable()
}

/// Whether a failure says something about the dependency's health.
///
/// Caller-side problems (bad credential, bad request) and rejections by an
/// inner breaker are excluded from circuit accounting.
pub fn is_dependency_failure(error: &ClientError) -> bool {
    match error {
        ClientError::AuthExpired
        | ClientError::CircuitOpen { .. }
        | ClientError::InvalidRequest(_)
        | ClientError::InvalidConfig(_) => false,
        ClientError::Http { status, .. } => !(400..500).contains(status) || *status == 408 || *status == 429,
        _ => true,
    }
}

fn matches_signature(message: &str, signatures: &[String]) -> bool {
    let message = message.to_lowercase();
    signatures
        .iter()
        .any(|signature| message.contains(&signature.to_lowercase()))
}
