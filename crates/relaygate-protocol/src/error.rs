use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// OpenAI-style error object, the stable caller-visible error schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, deserialize_with = "string_or_null")]
    pub message: String,
    #[serde(rename = "type", default, deserialize_with = "string_or_null")]
    pub kind: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub param: String,
    #[serde(default)]
    pub code: Value,
}

impl ApiError {
    pub fn new(message: impl Into<String>, kind: impl Into<String>, code: impl Into<Value>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            param: String::new(),
            code: code.into(),
        }
    }

    pub fn code_str(&self) -> Option<&str> {
        self.code.as_str()
    }
}

/// `{"error": {...}}` envelope, as sent by the gateway and most upstreams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// Unit of propagated failure. Immutable once built; use the `with_*`
/// helpers to derive an adjusted copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorWithStatusCode {
    error: ApiError,
    status_code: u16,
}

impl ErrorWithStatusCode {
    pub fn new(status_code: u16, error: ApiError) -> Self {
        Self { error, status_code }
    }

    /// Wraps an internal failure the way gateway-originated errors look:
    /// message from the cause, type `one_api_error`, caller supplied code.
    pub fn wrap(cause: impl fmt::Display, code: &str, status_code: u16) -> Self {
        Self::new(
            status_code,
            ApiError::new(cause.to_string(), "one_api_error", code),
        )
    }

    pub fn error(&self) -> &ApiError {
        &self.error
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let mut error = self.error.clone();
        error.message = message.into();
        Self::new(self.status_code, error)
    }

    pub fn to_body(&self) -> Vec<u8> {
        serde_json::to_vec(&ErrorBody {
            error: Some(self.error.clone()),
        })
        .unwrap_or_else(|_| br#"{"error":{"message":"internal error"}}"#.to_vec())
    }
}

impl fmt::Display for ErrorWithStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error.message, self.status_code)
    }
}

impl std::error::Error for ErrorWithStatusCode {}

fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    })
}
