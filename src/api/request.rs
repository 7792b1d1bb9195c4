//! Request and response value types.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// Header carrying the correlation id of a logical call.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A caller's request, before the pipeline decorates it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL (`/loads/42`), or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header, rejecting names or values that are not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> ClientResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("header '{}': {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Metadata of one logical call. Created fresh per call, never mutated;
/// the retry wrap derives a new value with [`AttemptContext::retried`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub correlation_id: Uuid,
    pub already_retried: bool,
}

impl AttemptContext {
    pub fn fresh() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            already_retried: false,
        }
    }

    /// Same logical call, marked as already wrapped by the retry path.
    pub fn retried(self) -> Self {
        Self {
            already_retried: true,
            ..self
        }
    }
}

/// Normalized outbound call handed to the transport.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub context: AttemptContext,
}

impl RequestDescriptor {
    pub fn new(request: &ApiRequest, context: AttemptContext) -> Self {
        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            headers: request.headers.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            context,
        }
    }

    /// Copy of this descriptor carrying `context`.
    pub fn with_context(&self, context: AttemptContext) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Decoded JSON body; `Null` when empty, a string when not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Decode the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| ClientError::Decode(e.to_string()))
    }
}
