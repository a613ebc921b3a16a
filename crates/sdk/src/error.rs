//! Error types for the directory client.

use junction_core::GatewayError;
use serde::{Deserialize, Serialize};

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors that can occur when talking to the directory service.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<String>,
    },

    /// Missing API key or unusable base URL.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl DirectoryError {
    /// Create an error from a non-success status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let (message, details) = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error_response) => (error_response.error, error_response.details),
            Err(_) => (body.to_string(), None),
        };

        match status {
            401 | 403 => Self::Authentication(message),
            404 => Self::NotFound(message),
            _ => Self::Api {
                status,
                message,
                details,
            },
        }
    }
}

impl From<DirectoryError> for GatewayError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Config(msg) => GatewayError::Config(msg),
            other => GatewayError::Directory(other.to_string()),
        }
    }
}

/// Error body returned by the directory API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_parses_error_body() {
        let err = DirectoryError::from_response(500, r#"{"error":"boom","details":"stack"}"#);
        match err {
            DirectoryError::Api {
                status,
                message,
                details,
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
                assert_eq!(details.as_deref(), Some("stack"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_response_maps_auth_and_missing() {
        assert!(matches!(
            DirectoryError::from_response(401, "bad key"),
            DirectoryError::Authentication(m) if m == "bad key"
        ));
        assert!(matches!(
            DirectoryError::from_response(404, r#"{"error":"no such document"}"#),
            DirectoryError::NotFound(m) if m == "no such document"
        ));
    }

    #[test]
    fn test_config_maps_to_gateway_config() {
        let err: GatewayError = DirectoryError::Config("API key is not configured".into()).into();
        assert!(err.is_config());

        let err: GatewayError = DirectoryError::from_response(502, "bad gateway").into();
        assert!(matches!(err, GatewayError::Directory(_)));
    }
}
