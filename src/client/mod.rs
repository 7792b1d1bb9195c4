//! Composition root.
//!
//! Builds every collaborator from one [`ClientConfig`] and wires them so
//! the request pipeline and the push channel share a single session and a
//! single breaker registry.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::api::{ApiRequest, ApiResponse, HttpTransport, RequestPipeline, Transport, API_DEPENDENCY};
use crate::config::validation::validate_config;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::observability::{ErrorReporter, TracingReporter};
use crate::push::{ConnectionManager, EventDispatcher, EventKind, PushSettings, Subscription, PUSH_DEPENDENCY};
use crate::resilience::{BreakerSettings, CircuitBreakerRegistry, RetryPolicy};
use crate::session::{HeadlessNavigator, Navigator, SessionContext};

/// Entry point for applications: REST calls plus push events.
pub struct FreightClient<T: Transport = HttpTransport> {
    config: ClientConfig,
    session: Arc<SessionContext>,
    breakers: Arc<CircuitBreakerRegistry>,
    pipeline: RequestPipeline<T>,
    dispatcher: EventDispatcher,
    connection: ConnectionManager,
}

impl FreightClient<HttpTransport> {
    /// Client using the HTTP transport described by `config.api`.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let transport = HttpTransport::new(&config.api)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> FreightClient<T> {
    /// Client over a custom transport, headless navigation, tracing reporter.
    pub fn with_transport(config: ClientConfig, transport: T) -> ClientResult<Self> {
        let navigator = Arc::new(HeadlessNavigator::new(config.session.login_path.clone()));
        Self::with_collaborators(config, transport, navigator, Arc::new(TracingReporter))
    }

    /// Fails with [`ClientError::InvalidConfig`] if `config` does not validate.
    pub fn with_collaborators(
        config: ClientConfig,
        transport: T,
        navigator: Arc<dyn Navigator>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> ClientResult<Self> {
        validate_config(&config).map_err(|errors| {
            let problems: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ClientError::InvalidConfig(problems.join(", "))
        })?;

        let session = Arc::new(SessionContext::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerSettings::default()));
        breakers.register(API_DEPENDENCY, BreakerSettings::from(&config.circuit_breakers.api));
        let push_breaker = breakers.register(PUSH_DEPENDENCY, BreakerSettings::from(&config.circuit_breakers.push));

        let pipeline = RequestPipeline::new(transport, session.clone(), &breakers, RetryPolicy::from(&config.retries))
            .with_navigator(navigator, config.session.login_path.clone())
            .with_reporter(reporter.clone());
        let dispatcher = EventDispatcher::with_reporter(reporter);
        let connection = ConnectionManager::new(
            PushSettings::from(&config.push),
            session.clone(),
            dispatcher.clone(),
            push_breaker,
        );

        Ok(Self {
            config,
            session,
            breakers,
            pipeline,
            dispatcher,
            connection,
        })
    }

    pub async fn request(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        self.pipeline.send(request).await
    }

    /// GET `path` and decode the body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> ClientResult<R> {
        self.request(&ApiRequest::get(path)).await?.json()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    pub fn subscribe_as<D, F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        D: DeserializeOwned,
        F: Fn(D) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_as(kind, handler)
    }

    /// Start a session and, if enabled, the push channel.
    /// Must be called from within a Tokio runtime.
    pub fn login(&self, token: impl Into<String>, profile: Option<Value>) {
        self.session.begin(token, profile);
        if self.config.push.enabled {
            self.connection.connect();
        }
    }

    /// End the session and close the push channel.
    pub fn logout(&self) {
        self.session.clear_session();
        self.connection.close();
    }

    /// Stop the push channel, wait for its loop to exit, then end the session.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        self.session.clear_session();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn pipeline(&self) -> &RequestPipeline<T> {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}
