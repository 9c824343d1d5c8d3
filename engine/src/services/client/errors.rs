use serde::Deserialize;
use thiserror::Error;

/// Client-side operation errors
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Request never produced a response
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Server answered with a non-success status
    #[error("PDS operation '{operation}' failed: {message}")]
    PdsOperationFailed {
        operation: String,
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid response format: expected {expected}, got {got}")]
    InvalidResponse { expected: String, got: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

/// Body of an XRPC error response.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ClientError {
    /// Builds the error for a non-success response body.
    pub fn from_response(operation: &str, status: u16, body: &str) -> Self {
        let parsed: XrpcErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .or_else(|| parsed.error.clone())
            .unwrap_or_else(|| {
                if body.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    body.to_string()
                }
            });

        if status == 401 && parsed.error.as_deref() == Some("ExpiredToken") {
            return ClientError::SessionExpired;
        }

        ClientError::PdsOperationFailed {
            operation: operation.to_string(),
            status,
            error_code: parsed.error,
            message,
        }
    }

    /// XRPC error name, e.g. `RepoNotFound`.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ClientError::PdsOperationFailed { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::PdsOperationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::NetworkError { .. } | ClientError::Timeout { .. } => true,
            ClientError::PdsOperationFailed { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(operation: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Timeout {
                operation: operation.to_string(),
            }
        } else {
            ClientError::NetworkError {
                message: format!("{}: {}", operation, error),
            }
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::SerializationError {
            message: err.to_string(),
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xrpc_error_body() {
        let err = ClientError::from_response(
            "getRepoStatus",
            400,
            r#"{"error":"RepoNotFound","message":"Could not find repo for DID"}"#,
        );
        assert_eq!(err.error_code(), Some("RepoNotFound"));
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("Could not find repo for DID"));
    }

    #[test]
    fn falls_back_to_raw_body() {
        let err = ClientError::from_response("importRepo", 502, "Bad Gateway");
        assert!(err.is_transient());
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn expired_token_maps_to_session_expired() {
        let err = ClientError::from_response(
            "getPreferences",
            401,
            r#"{"error":"ExpiredToken","message":"Token has expired"}"#,
        );
        assert!(matches!(err, ClientError::SessionExpired));
    }
}
