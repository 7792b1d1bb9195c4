//! Request pipeline.
//!
//! # Responsibilities
//! - Decorate every outbound call (bearer credential, correlation id, hooks)
//! - Route retryable failures through one breaker-wrapped retry loop
//! - Turn a rejected credential into a session wipe plus login redirect
//! - Report final failures to the error reporter
//!
//! # Design Decisions
//! - The first attempt goes straight to the transport; only a retryable
//!   failure enters the `CircuitBreaker("api") ∘ RetryExecutor` wrap
//! - A logical call enters that wrap at most once (`already_retried`)
//! - 401 is terminal: no retry, no circuit accounting

use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::api::request::{ApiRequest, ApiResponse, AttemptContext, RequestDescriptor, X_REQUEST_ID};
use crate::api::transport::{HttpTransport, Transport};
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics;
use crate::observability::{ErrorContext, ErrorReporter, TracingReporter};
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, RetryExecutor, RetryPolicy};
use crate::session::{is_login_surface, HeadlessNavigator, Navigator, SessionContext};

/// Breaker name guarding REST traffic.
pub const API_DEPENDENCY: &str = "api";

type OutboundHook = Arc<dyn Fn(&mut RequestDescriptor) + Send + Sync>;
type InboundHook = Arc<dyn Fn(&RequestDescriptor, &ClientResult<ApiResponse>) + Send + Sync>;

/// Orchestrates every REST call made by the client.
pub struct RequestPipeline<T: Transport = HttpTransport> {
    transport: T,
    session: Arc<SessionContext>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    executor: RetryExecutor,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    reporter: Arc<dyn ErrorReporter>,
    outbound_hooks: Vec<OutboundHook>,
    inbound_hooks: Vec<InboundHook>,
}

impl<T: Transport> RequestPipeline<T> {
    /// Build a pipeline sharing the registry's `"api"` breaker.
    pub fn new(
        transport: T,
        session: Arc<SessionContext>,
        breakers: &CircuitBreakerRegistry,
        retry_policy: RetryPolicy,
    ) -> Self {
        let login_path = "/login".to_string();
        Self {
            transport,
            session,
            breaker: breakers.get(API_DEPENDENCY),
            retry_policy,
            executor: RetryExecutor::new(API_DEPENDENCY),
            navigator: Arc::new(HeadlessNavigator::new(login_path.clone())),
            login_path,
            reporter: Arc::new(TracingReporter),
            outbound_hooks: Vec::new(),
            inbound_hooks: Vec::new(),
        }
    }

    /// Set the navigator and the login path it redirects to.
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>, login_path: impl Into<String>) -> Self {
        self.navigator = navigator;
        self.login_path = login_path.into();
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run `hook` once per logical call, after the credential and id are
    /// attached. Retries resend the descriptor it produced.
    pub fn with_outbound_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RequestDescriptor) + Send + Sync + 'static,
    {
        self.outbound_hooks.push(Arc::new(hook));
        self
    }

    /// Run `hook` after every physical attempt, success or failure.
    pub fn with_inbound_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RequestDescriptor, &ClientResult<ApiResponse>) + Send + Sync + 'static,
    {
        self.inbound_hooks.push(Arc::new(hook));
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Send `request` under the pipeline's retry policy.
    pub async fn send(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        self.send_with_policy(request, &self.retry_policy).await
    }

    /// Send `request` under a call-site specific retry policy.
    pub async fn send_with_policy(&self, request: &ApiRequest, policy: &RetryPolicy) -> ClientResult<ApiResponse> {
        let context = AttemptContext::fresh();
        let span = tracing::info_span!(
            "api_request",
            correlation_id = %context.correlation_id,
            method = %request.method,
            path = %request.path
        );
        let start = Instant::now();

        let result = async {
            let descriptor = self.prepare(request, context)?;
            match self.attempt(&descriptor).await {
                Ok(response) => Ok(response),
                Err(error) => self.recover(&descriptor, error, policy).await,
            }
        }
        .instrument(span)
        .await;

        let status = match &result {
            Ok(response) => Some(response.status),
            Err(error) => error.status(),
        };
        metrics::record_request(request.method.as_str(), status, start);
        result
    }

    /// Outbound stage: credential, correlation id, then caller hooks.
    fn prepare(&self, request: &ApiRequest, context: AttemptContext) -> ClientResult<RequestDescriptor> {
        let mut descriptor = RequestDescriptor::new(request, context);

        if let Some(token) = self.session.token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ClientError::InvalidRequest("session token is not a valid header value".to_string()))?;
            descriptor.headers.insert(AUTHORIZATION, value);
        }
        let id = HeaderValue::from_str(&context.correlation_id.to_string())
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        descriptor.headers.insert(X_REQUEST_ID, id);

        for hook in &self.outbound_hooks {
            hook(&mut descriptor);
        }
        Ok(descriptor)
    }

    /// One physical attempt followed by the inbound hooks.
    async fn attempt(&self, descriptor: &RequestDescriptor) -> ClientResult<ApiResponse> {
        let result = self.transport.send(descriptor).await;
        for hook in &self.inbound_hooks {
            hook(descriptor, &result);
        }
        result
    }

    /// Inbound failure stage.
    async fn recover(
        &self,
        descriptor: &RequestDescriptor,
        error: ClientError,
        policy: &RetryPolicy,
    ) -> ClientResult<ApiResponse> {
        if error.is_auth_rejection() {
            return Err(self.expire_session(descriptor));
        }

        if !policy.is_retryable(&error) || descriptor.context.already_retried {
            self.report(&error, "api_request", descriptor, 1);
            return Err(error);
        }

        tracing::debug!(error = %error, "Retryable failure, entering retry path");
        let retried = descriptor.with_context(descriptor.context.retried());
        let attempts = AtomicU32::new(1);
        let executor = &self.executor;
        let result = self
            .breaker
            .execute(|| {
                executor.run(policy, || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    self.attempt(&retried)
                })
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(error) if error.is_auth_rejection() => Err(self.expire_session(&retried)),
            Err(error) => {
                self.report(&error, "api_retry_failed", &retried, attempts.load(Ordering::Relaxed));
                Err(error)
            }
        }
    }

    /// Wipe the session and leave the protected surface.
    fn expire_session(&self, descriptor: &RequestDescriptor) -> ClientError {
        let cleared = self.session.clear_session();
        tracing::warn!(
            correlation_id = %descriptor.context.correlation_id,
            cleared,
            "Credential rejected, session expired"
        );
        if !is_login_surface(&self.navigator.current_path(), &self.login_path) {
            self.navigator.navigate_to_login();
        }
        ClientError::AuthExpired
    }

    /// `attempts` counts physical sends for this logical call.
    fn report(&self, error: &ClientError, label: &'static str, descriptor: &RequestDescriptor, attempts: u32) {
        let context = ErrorContext::new(label)
            .dependency(API_DEPENDENCY)
            .request(descriptor.method.as_str(), descriptor.path.clone())
            .attempt(attempts)
            .correlation_id(descriptor.context.correlation_id);
        self.reporter.report_error(error, &context);
    }
}
