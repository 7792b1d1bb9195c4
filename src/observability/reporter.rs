//! Error reporting.
//!
//! Final failures of the request pipeline and panicking push handlers are
//! handed to an [`ErrorReporter`]. Reporting is fire-and-forget: a reporter
//! must never panic or block the caller for long.

use std::collections::VecDeque;
use std::error::Error;
use std::sync::Mutex;
use uuid::Uuid;

use crate::observability::metrics;

/// Number of reports [`MemoryReporter`] keeps.
pub const MEMORY_REPORTER_CAPACITY: usize = 50;

/// Where a reported failure came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Stable label (`api_request`, `api_retry_failed`, `push_handler`, ...).
    pub label: &'static str,
    pub dependency: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub attempt: Option<u32>,
    pub correlation_id: Option<Uuid>,
}

impl ErrorContext {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            ..Self::default()
        }
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn request(mut self, method: impl Into<String>, url: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.url = Some(url.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Sink for failures that reached the end of their handling path.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, error: &dyn Error, context: &ErrorContext);
}

/// Default reporter: emits a structured `error` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report_error(&self, error: &dyn Error, context: &ErrorContext) {
        metrics::record_reported_error(context.label);
        tracing::error!(
            label = context.label,
            dependency = context.dependency.as_deref().unwrap_or("-"),
            method = context.method.as_deref().unwrap_or("-"),
            url = context.url.as_deref().unwrap_or("-"),
            attempt = context.attempt,
            correlation_id = %context.correlation_id.map(|id| id.to_string()).unwrap_or_default(),
            error = %error,
            "Error reported"
        );
    }
}

/// A single captured report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub context: ErrorContext,
}

/// Keeps the most recent reports in memory, oldest evicted first.
#[derive(Debug)]
pub struct MemoryReporter {
    capacity: usize,
    reports: Mutex<VecDeque<ErrorReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_REPORTER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            reports: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Reports currently retained, oldest first.
    pub fn recent(&self) -> Vec<ErrorReport> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorReport>> {
        self.reports.lock().expect("error report buffer poisoned")
    }
}

impl Default for MemoryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorReporter for MemoryReporter {
    fn report_error(&self, error: &dyn Error, context: &ErrorContext) {
        metrics::record_reported_error(context.label);
        let mut reports = self.lock();
        if reports.len() == self.capacity {
            reports.pop_front();
        }
        reports.push_back(ErrorReport {
            message: error.to_string(),
            context: context.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn test_memory_reporter_keeps_most_recent() {
        let reporter = MemoryReporter::new();
        for status in 0..60u16 {
            let error = ClientError::Http { status: 500 + status % 4, message: format!("#{}", status) };
            reporter.report_error(&error, &ErrorContext::new("api_request").attempt(status as u32));
        }
        let recent = reporter.recent();
        assert_eq!(recent.len(), MEMORY_REPORTER_CAPACITY);
        assert_eq!(recent[0].context.attempt, Some(10));
        assert!(recent.last().unwrap().message.ends_with("#59"));
    }

    #[test]
    fn test_context_builder() {
        let id = Uuid::new_v4();
        let context = ErrorContext::new("api_retry_failed")
            .dependency("api")
            .request("GET", "/loads")
            .correlation_id(id);
        assert_eq!(context.dependency.as_deref(), Some("api"));
        assert_eq!(context.method.as_deref(), Some("GET"));
        assert_eq!(context.url.as_deref(), Some("/loads"));
        assert_eq!(context.correlation_id, Some(id));
        assert_eq!(context.attempt, None);
    }

    #[test]
    fn test_tracing_reporter_never_panics() {
        let error = ClientError::Network { message: "connection refused".into() };
        TracingReporter.report_error(&error, &ErrorContext::new("api_request"));
    }
}
