//! Retry logic.
//!
//! # Responsibilities
//! - Hold the retry policy (budget, delays, retryable statuses/signatures)
//! - Execute retries with exponential backoff + jitter
//! - Make every retry observable (attempt index, computed delay)
//!
//! # Design Decisions
//! - Total attempts are bounded at `max_retries + 1`
//! - Terminal failures are returned immediately, unchanged
//! - Attempts are strictly sequential; attempt N+1 starts after N resolves

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::classify::{self, FailureKind, DEFAULT_RETRYABLE_SIGNATURES, DEFAULT_RETRYABLE_STATUSES};

/// Immutable retry configuration. Clone and adjust to override per call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: BTreeSet<u16>,
    pub retryable_error_signatures: Vec<String>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Backoff schedule derived from this policy.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_delay, self.max_delay)
    }

    /// Classify a failure under this policy.
    pub fn classify(&self, error: &ClientError) -> FailureKind {
        classify::classify(error, &self.retryable_statuses, &self.retryable_error_signatures)
    }

    pub fn is_retryable(&self, error: &ClientError) -> bool {
        self.classify(error).is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            retryable_error_signatures: DEFAULT_RETRYABLE_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: if config.enabled { config.max_retries } else { 0 },
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
            retryable_error_signatures: config.retryable_errors.clone(),
        }
    }
}

/// Drives repeated invocation of an operation under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    dependency: String,
}

impl RetryExecutor {
    /// `dependency` labels retry logs and metrics.
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Run `operation` until it succeeds, fails terminally, or the retry
    /// budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, policy: &RetryPolicy, mut operation: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let backoff = policy.backoff();
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(dependency = %self.dependency, attempts = attempt + 1, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = policy.classify(&error);
            if !kind.is_retryable() {
                tracing::debug!(dependency = %self.dependency, attempt = attempt + 1, kind = kind.as_str(), error = %error, "Terminal failure, not retrying");
                return Err(error);
            }
            if attempt >= policy.max_retries {
                tracing::warn!(
                    dependency = %self.dependency,
                    attempts = attempt + 1,
                    error = %error,
                    "Retry budget exhausted"
                );
                metrics::record_retry_exhausted(&self.dependency);
                return Err(error);
            }

            let delay = backoff.delay_for(attempt);
            tracing::warn!(
                dependency = %self.dependency,
                attempt = attempt + 1,
                max_attempts = policy.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                kind = kind.as_str(),
                error = %error,
                "Attempt failed, retrying"
            );
            metrics::record_retry(&self.dependency, kind);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_on_persistent_failure() {
        let executor = RetryExecutor::new("api");
        for max_retries in [0, 1, 3, 5] {
            let calls = AtomicU32::new(0);
            let result: ClientResult<()> = executor
                .run(&fast_policy(max_retries), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Http { status: 503, message: "unavailable".into() })
                })
                .await;
            assert_eq!(result.unwrap_err().status(), Some(503));
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_terminal_error() {
        let executor = RetryExecutor::new("api");
        let calls = AtomicU32::new(0);
        let result: ClientResult<()> = executor
            .run(&fast_policy(3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Http { status: 400, message: "bad request".into() })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_mid_budget() {
        let executor = RetryExecutor::new("api");
        let calls = AtomicU32::new(0);
        let result = executor
            .run(&fast_policy(3), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ClientError::Network { message: "connection reset".into() })
                } else {
                    Ok("delivered")
                }
            })
            .await;
        assert_eq!(result, Ok("delivered"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let executor = RetryExecutor::new("api");
        let policy = fast_policy(2);
        let started = tokio::time::Instant::now();
        let _: ClientResult<()> = executor
            .run(&policy, || async { Err(ClientError::Timeout(Duration::from_secs(30))) })
            .await;
        // 10ms + 20ms base, each with up to 30% jitter.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(30));
        assert!(waited <= Duration::from_millis(40));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = RetryConfig::default();
        config.max_retries = 5;
        config.retryable_statuses = vec![503];
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 5);
        assert!(policy.is_retryable(&ClientError::Http { status: 503, message: String::new() }));
        assert!(!policy.is_retryable(&ClientError::Http { status: 502, message: String::new() }));

        config.enabled = false;
        assert_eq!(RetryPolicy::from(&config).max_retries, 0);
    }
}
