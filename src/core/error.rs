//! # Error Handling Module
//!
//! All failures the gateway can surface are variants of [`GatewayError`]. Each variant
//! maps to an HTTP status code and a stable `type` string, so client tooling can branch
//! on `mapping_not_found` versus `backend_unreachable` without parsing messages.
//!
//! The JSON body produced by [`IntoResponse`] always has the shape:
//!
//! ```json
//! { "error": { "code": 404, "message": "...", "type": "mapping_not_found", "retryable": false } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error taxonomy for the gateway.
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display` for each variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No mapping entry matched the request URI
    #[error("No mapping found for URI: {uri}")]
    MappingNotFound { uri: String },

    /// The resolved backend could not be reached or failed mid-transfer
    #[error("Backend unreachable: {backend} - {reason}")]
    BackendUnreachable { backend: String, reason: String },

    /// A listener restart did not complete within its budget
    #[error("Restart timed out during {phase} after {waited_ms}ms")]
    RestartTimeout { phase: String, waited_ms: u64 },

    /// Token missing, malformed, expired or with a bad signature
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Authenticated caller is not allowed to perform the request
    #[error("Authorization denied: {reason}")]
    Authorization { reason: String },

    /// A mapping entry violates the placeholder invariant
    #[error("Invalid mapping {key}: {reason}")]
    InvalidMapping { key: String, reason: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// TLS material could not be loaded
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binds, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration and spec files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors that are not connectivity failures
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a mapping-not-found error for the given request URI
    pub fn mapping_not_found<S: Into<String>>(uri: S) -> Self {
        Self::MappingNotFound { uri: uri.into() }
    }

    /// Create a backend-unreachable error
    pub fn backend_unreachable<B: Into<String>, R: Into<String>>(backend: B, reason: R) -> Self {
        Self::BackendUnreachable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a restart timeout error for the given phase
    pub fn restart_timeout<S: Into<String>>(phase: S, waited: std::time::Duration) -> Self {
        Self::RestartTimeout {
            phase: phase.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an authorization error with a custom reason
    pub fn authz<S: Into<String>>(reason: S) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    pub fn invalid_mapping<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidMapping {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn tls<S: Into<String>>(message: S) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code returned to clients for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MappingNotFound { .. } => StatusCode::NOT_FOUND,
            Self::BackendUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::InvalidMapping { .. } => StatusCode::BAD_REQUEST,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::RestartTimeout { .. }
            | Self::Configuration { .. }
            | Self::Tls { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a client may reasonably retry the request.
    ///
    /// The gateway itself never retries; this only feeds the `retryable` flag of the
    /// error body.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable { .. } | Self::HttpClient { .. } | Self::RestartTimeout { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MappingNotFound { .. } => "mapping_not_found",
            Self::BackendUnreachable { .. } => "backend_unreachable",
            Self::RestartTimeout { .. } => "restart_timeout",
            Self::Authentication { .. } => "authentication_failed",
            Self::Authorization { .. } => "authorization_denied",
            Self::InvalidMapping { .. } => "invalid_mapping",
            Self::Configuration { .. } => "configuration_error",
            Self::Tls { .. } => "tls_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let backend = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            Self::BackendUnreachable {
                backend,
                reason: err.to_string(),
            }
        } else {
            Self::HttpClient {
                message: err.to_string(),
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for GatewayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Authentication {
            reason: err.to_string(),
        }
    }
}

impl From<notify::Error> for GatewayError {
    fn from(err: notify::Error) -> Self {
        Self::Io {
            message: format!("file watcher: {}", err),
        }
    }
}

/// Convert errors into the stable JSON error body.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::mapping_not_found("/api/x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::backend_unreachable("svc:80", "refused").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(GatewayError::auth("no token").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::authz("denied").status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_types_are_distinct_for_clients() {
        let not_found = GatewayError::mapping_not_found("/a");
        let unreachable = GatewayError::backend_unreachable("svc:80", "timeout");
        assert_eq!(not_found.error_type(), "mapping_not_found");
        assert_eq!(unreachable.error_type(), "backend_unreachable");
        assert_ne!(not_found.error_type(), unreachable.error_type());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::backend_unreachable("svc:80", "refused").is_retryable());
        assert!(!GatewayError::mapping_not_found("/a").is_retryable());
        assert!(!GatewayError::auth("invalid token").is_retryable());
        assert!(!GatewayError::authz("forbidden").is_retryable());
    }

    #[test]
    fn test_restart_timeout_records_wait() {
        let err = GatewayError::restart_timeout("port release", std::time::Duration::from_secs(30));
        assert_eq!(
            err,
            GatewayError::RestartTimeout {
                phase: "port release".to_string(),
                waited_ms: 30_000
            }
        );
        assert!(err.to_string().contains("30000ms"));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = GatewayError::mapping_not_found("/api/invalid").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "mapping_not_found");
        assert_eq!(value["error"]["code"], 404);
        assert_eq!(value["error"]["retryable"], false);
    }
}
