//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap each physical attempt with a single overall deadline
//! - Cancel the attempt cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and classified retryable

use std::future::Future;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Await `future`, failing with [`ClientError::Timeout`] after `limit`.
pub async fn with_timeout<T, Fut>(limit: Duration, future: Fut) -> ClientResult<T>
where
    Fut: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(timeout_ms = limit.as_millis() as u64, "Attempt timed out");
            Err(ClientError::Timeout(limit))
        }
    }
}
