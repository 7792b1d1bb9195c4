//! Transport boundary.
//!
//! # Responsibilities
//! - Perform exactly one physical attempt per `send`
//! - Enforce a single overall deadline per attempt
//! - Map wire failures onto [`ClientError`] without classifying them
//!
//! # Design Decisions
//! - Non-2xx responses are errors carrying status and server message
//! - Response bodies are decoded as JSON when possible, text otherwise

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::api::request::{ApiResponse, RequestDescriptor};
use crate::config::ApiConfig;
use crate::error::{ClientError, ClientResult};
use crate::resilience::timeouts::with_timeout;

/// Sends one physical attempt of a request.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: &RequestDescriptor) -> impl Future<Output = ClientResult<ApiResponse>> + Send;
}

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> ClientResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("base URL '{}': {}", config.base_url, e)))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("freight-link/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url, Duration::from_secs(config.timeout_secs)))
    }

    pub fn with_client(client: reqwest::Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` below the base URL. Absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> ClientResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| ClientError::InvalidRequest(format!("'{}': {}", path, e)));
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| ClientError::InvalidRequest(format!("'{}': {}", joined, e)))
    }

    async fn perform(&self, request: &RequestDescriptor) -> ClientResult<ApiResponse> {
        let url = self.url_for(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let body = decode_body(&bytes);

        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                headers,
                body,
            })
        } else {
            Err(ClientError::Http {
                status: status.as_u16(),
                message: error_message(&body, status.canonical_reason()),
            })
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> ClientResult<ApiResponse> {
        with_timeout(self.timeout, self.perform(request)).await
    }
}

fn map_reqwest_error(error: reqwest::Error) -> ClientError {
    if error.is_builder() {
        ClientError::InvalidRequest(error.to_string())
    } else if error.is_connect() || error.is_request() || error.is_timeout() || error.is_body() || error.is_decode() {
        ClientError::Network {
            message: error.to_string(),
        }
    } else {
        ClientError::Transport(error.to_string())
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Prefer the server's `message` field, then a plain-text body, then the reason phrase.
fn error_message(body: &Value, reason: Option<&str>) -> String {
    match body {
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
    .unwrap_or_else(|| reason.unwrap_or("request failed").to_string())
}
