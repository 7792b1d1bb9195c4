//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within monitoring period
//! Open → Half-Open: after reset timeout
//! Half-Open → Closed: probe call succeeds
//! Half-Open → Open: probe call fails (clock restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, shared process-wide via the registry
//! - Fail fast in Open state (operation is never invoked)
//! - Single probe in Half-Open (prevents hammering recovering dependency)
//! - Errors are never swallowed; the breaker only gates calls

use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics;
use crate::resilience::classify::is_dependency_failure;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Failures within `monitoring_period` that open the circuit.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Sliding window for failure counting.
    pub monitoring_period: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            monitoring_period: Duration::from_secs(config.monitoring_period_secs),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    probe_in_flight: Option<u64>,
    probes: u64,
}

impl BreakerInner {
    fn admit_probe(&mut self) -> u64 {
        self.probes += 1;
        self.probe_in_flight = Some(self.probes);
        self.probes
    }

    /// Frees the slot if `probe` is the one in flight; reports whether it was.
    fn release_probe(&mut self, probe: Option<u64>) -> bool {
        match probe {
            Some(id) if self.probe_in_flight == Some(id) => {
                self.probe_in_flight = None;
                true
            }
            _ => false,
        }
    }
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                last_failure: None,
                probe_in_flight: None,
                probes: 0,
            }),
        }
    }

    /// Dependency this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Current state. An Open breaker whose timeout has elapsed still
    /// reports Open until the next call moves it to Half-Open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures recorded within the monitoring period.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.lock();
        self.prune(&mut inner, Instant::now());
        inner.failures.len()
    }

    /// Manually close the circuit and forget recorded failures.
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.last_failure = None;
            inner.probe_in_flight = None;
        }
        tracing::info!(dependency = %self.name, "Circuit breaker manually reset");
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
    }

    /// Run `operation` if the circuit allows it.
    ///
    /// Returns [`ClientError::CircuitOpen`] without invoking `operation`
    /// while Open. Failures that reflect dependency health are recorded;
    /// the original error is always returned to the caller.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut permit = self.acquire()?;
        let result = operation().await;
        let probe = permit.probe.take();
        match &result {
            Ok(_) => self.on_success(probe),
            Err(error) if is_dependency_failure(error) => self.on_failure(probe),
            Err(_) => self.on_neutral(probe),
        }
        result
    }

    fn acquire(&self) -> ClientResult<ProbePermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(ProbePermit { breaker: self, probe: None }),
            CircuitState::HalfOpen if inner.probe_in_flight.is_some() => Err(self.rejection()),
            CircuitState::HalfOpen => {
                let probe = inner.admit_probe();
                Ok(ProbePermit { breaker: self, probe: Some(probe) })
            }
            CircuitState::Open => {
                let now = Instant::now();
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.settings.reset_timeout);
                if elapsed < self.settings.reset_timeout {
                    return Err(self.rejection());
                }
                inner.state = CircuitState::HalfOpen;
                let probe = inner.admit_probe();
                drop(inner);
                tracing::info!(dependency = %self.name, "Circuit breaker moving to half-open");
                metrics::record_circuit_state(&self.name, CircuitState::HalfOpen);
                Ok(ProbePermit { breaker: self, probe: Some(probe) })
            }
        }
    }

    fn rejection(&self) -> ClientError {
        metrics::record_circuit_rejection(&self.name);
        ClientError::CircuitOpen {
            dependency: self.name.clone(),
        }
    }

    /// Only the current half-open probe may close the circuit. Calls admitted
    /// earlier while Closed leave the state alone.
    fn on_success(&self, probe: Option<u64>) {
        let recovered = {
            let mut inner = self.lock();
            if inner.release_probe(probe) && inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                true
            } else {
                false
            }
        };
        if recovered {
            tracing::info!(dependency = %self.name, "Circuit closed, dependency recovered");
            metrics::record_circuit_state(&self.name, CircuitState::Closed);
        }
    }

    fn on_failure(&self, probe: Option<u64>) {
        let now = Instant::now();
        let opened = {
            let mut inner = self.lock();
            inner.failures.push_back(now);
            inner.last_failure = Some(now);
            self.prune(&mut inner, now);

            let was_probe = inner.release_probe(probe) && inner.state == CircuitState::HalfOpen;
            let over_threshold = inner.failures.len() >= self.settings.failure_threshold as usize;
            if was_probe || (inner.state == CircuitState::Closed && over_threshold) {
                inner.state = CircuitState::Open;
                Some(inner.failures.len())
            } else {
                None
            }
        };
        if let Some(failures) = opened {
            tracing::error!(
                dependency = %self.name,
                failures,
                threshold = self.settings.failure_threshold,
                "Circuit opened, too many failures"
            );
            metrics::record_circuit_state(&self.name, CircuitState::Open);
        }
    }

    /// A caller-side failure: releases the probe slot without changing state.
    fn on_neutral(&self, probe: Option<u64>) {
        self.lock().release_probe(probe);
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        let period = self.settings.monitoring_period;
        while let Some(oldest) = inner.failures.front() {
            if now.saturating_duration_since(*oldest) >= period {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

/// Admission ticket for one call. Carries the probe id when the call is the
/// half-open probe, and releases that slot if the call is dropped mid-flight.
struct ProbePermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Drop for ProbePermit<'_> {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            self.breaker.on_neutral(Some(probe));
        }
    }
}

/// Process-wide breakers keyed by dependency name.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry; unknown names get `defaults`.
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    /// Register a breaker with explicit settings. An existing breaker of the
    /// same name is kept as-is.
    pub fn register(&self, name: &str, settings: BreakerSettings) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, settings)))
            .clone()
    }

    /// Fetch the breaker for `name`, creating it with default settings.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.register(name, self.defaults)
    }

    /// Close every breaker.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// `(name, state, failures)` for every registered breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, CircuitState, usize)> {
        let mut rows: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state(), entry.value().failure_count()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}
