//! Uniform result shape returned by the interceptor

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Decoded response body. Anything that is not JSON is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Text(String),
}

impl Body {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Body::Empty;
        }
        match serde_json::from_str(raw) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(raw.to_string()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Body::Empty => Value::Null,
            Body::Json(value) => value,
            Body::Text(text) => Value::String(text),
        }
    }

    /// Best human-readable message for an error body
    pub fn message(&self) -> String {
        match self {
            Body::Empty => String::new(),
            Body::Text(text) => text.clone(),
            Body::Json(value) => ["message", "error", "detail"]
                .iter()
                .find_map(|key| value.get(key).and_then(|v| v.as_str()))
                .map(String::from)
                .unwrap_or_else(|| value.to_string()),
        }
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Body,
}

impl ApiResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Body::Json(value) => T::deserialize(value),
            Body::Empty => T::deserialize(Value::Null),
            Body::Text(text) => serde_json::from_str(text),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No response reached us
    #[error("request failed: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Non-2xx response, surfaced without retry
    #[error("HTTP {status}: {}", .body.message())]
    Http { status: u16, body: Body },
    /// 401 that a token refresh could not recover; the session was cleared
    #[error("authentication failed, please log in again")]
    AuthenticationFailed,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::AuthenticationFailed => Some(401),
            ApiError::Network(_) | ApiError::Timeout(_) => None,
        }
    }
}

pub type ApiResult = Result<ApiResponse, ApiError>;

/// Serializable `{ success, data, error, status }` view of an [`ApiResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<ApiResult> for ApiOutcome {
    fn from(result: ApiResult) -> Self {
        match result {
            Ok(resp) => Self {
                success: true,
                data: Some(resp.body.into_value()),
                error: None,
                status: Some(resp.status),
            },
            Err(ApiError::Network(_)) => Self {
                success: false,
                data: None,
                error: Some("request failed".to_string()),
                status: None,
            },
            Err(ApiError::Timeout(_)) => Self {
                success: false,
                data: None,
                error: Some("request timed out".to_string()),
                status: None,
            },
            Err(ApiError::Http { status, body }) => Self {
                success: false,
                error: Some(body.message()),
                data: Some(body.into_value()),
                status: Some(status),
            },
            Err(err @ ApiError::AuthenticationFailed) => Self {
                success: false,
                data: None,
                error: Some(err.to_string()),
                status: err.status(),
            },
        }
    }
}
