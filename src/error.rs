//! Error types shared by the request pipeline and the push channel.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the request pipeline.
///
/// The variants describe what happened on the wire. Whether a failure is
/// worth retrying is decided separately by [`crate::resilience::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No response was received (connection refused, reset, DNS failure).
    #[error("network error: {message}")]
    Network { message: String },

    /// The physical attempt exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The credential was rejected; the local session has been wiped.
    #[error("session expired, please log in again")]
    AuthExpired,

    /// The dependency is known to be down; the call was not attempted.
    #[error("circuit breaker is open for {dependency}, service unavailable")]
    CircuitOpen { dependency: String },

    /// Opaque transport failure, classified by its message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built (bad URL, invalid header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client was built from a configuration that fails validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The response body did not match the expected shape.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::AuthExpired => Some(401),
            _ => None,
        }
    }

    /// Whether the backend rejected the caller's credential.
    pub fn is_auth_rejection(&self) -> bool {
        self.status() == Some(401)
    }

    /// Short, user-facing description suitable for a notification banner.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::AuthExpired => "Your session has expired. Please log in again.",
            ClientError::Http { status, .. } if (400..500).contains(status) && *status != 408 && *status != 429 => {
                "The request could not be completed."
            }
            ClientError::InvalidRequest(_) | ClientError::InvalidConfig(_) | ClientError::Decode(_) => {
                "The request could not be completed."
            }
            _ => "Service temporarily unavailable. Please try again shortly.",
        }
    }
}

/// Result type for request pipeline operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors from the push channel's outbound API.
#[derive(Debug, Error)]
pub enum PushError {
    /// No live connection to send on.
    #[error("push channel is not connected")]
    NotConnected,

    /// Outbound frame could not be serialized.
    #[error("failed to encode push frame: {0}")]
    Encode(#[from] serde_json::Error),
}
