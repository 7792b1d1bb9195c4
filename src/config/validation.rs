//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate URLs and their schemes
//! - Validate value ranges (timeouts > 0, delays ordered, statuses valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{CircuitBreakerConfig, ClientConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid URL '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field}: scheme '{scheme}' not allowed (expected {expected})")]
    InvalidScheme {
        field: &'static str,
        scheme: String,
        expected: &'static str,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: {detail}")]
    OutOfRange { field: &'static str, detail: String },

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },
}

/// Check every semantic rule, collecting all failures.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url(&mut errors, "api.base_url", &config.api.base_url, &["http", "https"], "http or https");
    non_zero(&mut errors, "api.timeout_secs", config.api.timeout_secs);

    let retries = &config.retries;
    non_zero(&mut errors, "retries.initial_delay_ms", retries.initial_delay_ms);
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::OutOfRange {
            field: "retries.max_delay_ms",
            detail: format!(
                "{} is below retries.initial_delay_ms ({})",
                retries.max_delay_ms, retries.initial_delay_ms
            ),
        });
    }
    for status in &retries.retryable_statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::OutOfRange {
                field: "retries.retryable_statuses",
                detail: format!("{} is not an HTTP status", status),
            });
        }
        if *status == 401 {
            errors.push(ValidationError::OutOfRange {
                field: "retries.retryable_statuses",
                detail: "401 is handled as session expiry and cannot be retried".to_string(),
            });
        }
    }

    check_breaker(
        &mut errors,
        [
            "circuit_breakers.api.failure_threshold",
            "circuit_breakers.api.reset_timeout_secs",
            "circuit_breakers.api.monitoring_period_secs",
        ],
        &config.circuit_breakers.api,
    );
    check_breaker(
        &mut errors,
        [
            "circuit_breakers.push.failure_threshold",
            "circuit_breakers.push.reset_timeout_secs",
            "circuit_breakers.push.monitoring_period_secs",
        ],
        &config.circuit_breakers.push,
    );

    let push = &config.push;
    if push.enabled {
        check_url(&mut errors, "push.url", &push.url, &["ws", "wss"], "ws or wss");
    }
    non_zero(&mut errors, "push.connect_timeout_secs", push.connect_timeout_secs);
    non_zero(&mut errors, "push.initial_delay_ms", push.initial_delay_ms);
    if push.max_delay_ms < push.initial_delay_ms {
        errors.push(ValidationError::OutOfRange {
            field: "push.max_delay_ms",
            detail: format!("{} is below push.initial_delay_ms ({})", push.max_delay_ms, push.initial_delay_ms),
        });
    }
    non_zero(&mut errors, "push.ping_interval_ms", push.ping_interval_ms);
    if push.idle_timeout_ms <= push.ping_interval_ms {
        errors.push(ValidationError::OutOfRange {
            field: "push.idle_timeout_ms",
            detail: "must exceed push.ping_interval_ms".to_string(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: &str,
    schemes: &[&str],
    expected: &'static str,
) {
    match Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::InvalidScheme {
            field,
            scheme: url.scheme().to_string(),
            expected,
        }),
        Err(_) => errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

fn check_breaker(errors: &mut Vec<ValidationError>, fields: [&'static str; 3], breaker: &CircuitBreakerConfig) {
    non_zero(errors, fields[0], breaker.failure_threshold as u64);
    non_zero(errors, fields[1], breaker.reset_timeout_secs);
    non_zero(errors, fields[2], breaker.monitoring_period_secs);
}

fn non_zero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ClientConfig::default()), Ok(()));
    }

    #[test]
    fn test_rejects_wrong_schemes() {
        let mut config = ClientConfig::default();
        config.api.base_url = "ftp://example.com".into();
        config.push.url = "http://example.com/ws".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ValidationError::InvalidScheme { .. })));
    }

    #[test]
    fn test_push_url_ignored_when_disabled() {
        let mut config = ClientConfig::default();
        config.push.enabled = false;
        config.push.url = "not a url".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_retrying_401_and_bad_delays() {
        let mut config = ClientConfig::default();
        config.retries.retryable_statuses.push(401);
        config.retries.max_delay_ms = 10;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().starts_with("retries.max_delay_ms"));
    }

    #[test]
    fn test_metrics_address_checked_when_enabled() {
        let mut config = ClientConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidAddress {
                field: "observability.metrics_address",
                value: "localhost".into(),
            }]
        );
    }
}
