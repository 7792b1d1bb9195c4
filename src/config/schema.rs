//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::resilience::classify::{DEFAULT_RETRYABLE_SIGNATURES, DEFAULT_RETRYABLE_STATUSES};

/// Root configuration for the communication layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// REST API endpoint and per-attempt timeout.
    pub api: ApiConfig,

    /// Retry configuration for request traffic.
    pub retries: RetryConfig,

    /// Circuit breaker thresholds per dependency.
    pub circuit_breakers: CircuitBreakersConfig,

    /// Push channel settings.
    pub push: PushConfig,

    /// Session / navigation settings.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// REST API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL all request paths are resolved against.
    pub base_url: String,

    /// Overall timeout per physical attempt in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// HTTP statuses treated as transient.
    pub retryable_statuses: Vec<u16>,

    /// Error message fragments treated as network failures.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            retryable_errors: DEFAULT_RETRYABLE_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Breakers created at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakersConfig {
    /// Breaker guarding REST traffic.
    pub api: CircuitBreakerConfig,

    /// Breaker guarding push-channel connects.
    pub push: CircuitBreakerConfig,
}

impl Default for CircuitBreakersConfig {
    fn default() -> Self {
        Self {
            api: CircuitBreakerConfig::default(),
            push: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_secs: 60,
                monitoring_period_secs: 60,
            },
        }
    }
}

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring period that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed.
    pub reset_timeout_secs: u64,

    /// Sliding window for failure counting, in seconds.
    pub monitoring_period_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            monitoring_period_secs: 60,
        }
    }
}

/// Push channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PushConfig {
    /// Connect the push channel on login.
    pub enabled: bool,

    /// Websocket endpoint (ws:// or wss://).
    pub url: String,

    /// Handshake timeout in seconds.
    pub connect_timeout_secs: u64,

    /// First reconnect delay in milliseconds.
    pub initial_delay_ms: u64,

    /// Reconnect delay cap in milliseconds.
    pub max_delay_ms: u64,

    /// Give up after this many consecutive reconnects (unset = never).
    pub max_reconnect_attempts: Option<u32>,

    /// Client ping interval in milliseconds.
    pub ping_interval_ms: u64,

    /// Silence longer than this marks the connection as lost.
    pub idle_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://localhost:5000/ws".to_string(),
            connect_timeout_secs: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_reconnect_attempts: None,
            ping_interval_ms: 25_000,
            idle_timeout_ms: 60_000,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path of the login surface; 401s redirect here unless already on it.
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
