use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Map, Value};
use warp::http::StatusCode;

/// Error returned by every endpoint of the gateway API.
///
/// Rendered as `{"code": ..., "message": ..., "data": ...}`. The HTTP status is
/// carried alongside but never serialized into the body.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub data: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Client supplied data that failed syntax or semantic validation.
    pub fn invalid_parameter(field: &str, value: &str, message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_parameter", message)
            .with_data("field", json!(field))
            .with_data("value", json!(value))
    }

    pub fn missing_parameter(field: &str) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "missing_parameter",
            format!("Required parameter is missing: {}", field),
        )
        .with_data("field", json!(field))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn idempotency_conflict() -> Self {
        ApiError::new(
            StatusCode::CONFLICT,
            "idempotency_conflict",
            "Provided idempotency key is tied to other input",
        )
    }

    /// Generic failure. Never carries collaborator details.
    pub fn internal_server_error() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            "Internal server error",
        )
    }

    /// Adds a key to the `data` object, creating it if needed.
    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        match self.data {
            Value::Object(ref mut map) => {
                map.insert(key.to_owned(), value);
            }
            _ => {
                let mut map = Map::new();
                map.insert(key.to_owned(), value);
                self.data = Value::Object(map);
            }
        }
        self
    }

    pub fn to_body(&self) -> Bytes {
        // Serializing a struct of strings and a `Value` cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}
