//! Error types for Fedgate
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//!
//! Authentication failures are collapsed into one generic
//! 401 response. The specific cause is kept in logs and metrics only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// `Signature` header is missing, incomplete or references absent headers
    #[error("Malformed signature header: {0}")]
    MalformedSignatureHeader(String),

    /// Remote actor unreachable or answered with a non-2xx status
    #[error("Key fetch failed: {0}")]
    KeyFetchFailure(String),

    /// Key document present but the embedded key material is unusable
    #[error("Key import failed: {0}")]
    KeyImportFailure(String),

    /// Well-formed inputs but the signature does not match
    #[error("Signature verification failed")]
    VerificationMismatch,

    /// User input does not follow the handle grammar (400)
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Identifier looks resolvable but has no matching record (404)
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unprocessable entity (422)
    #[error("Unprocessable entity: {0}")]
    Unprocessable(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether this error means "the request's claimed signer is not proven".
    ///
    /// Callers at the request boundary treat every such error as
    /// unauthenticated; there is no partial-trust state.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AppError::MalformedSignatureHeader(_)
                | AppError::KeyFetchFailure(_)
                | AppError::KeyImportFailure(_)
                | AppError::VerificationMismatch
                | AppError::Unauthorized
        )
    }

    /// Stable label used for metrics and structured logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::MalformedSignatureHeader(_) => "malformed_signature_header",
            AppError::KeyFetchFailure(_) => "key_fetch_failure",
            AppError::KeyImportFailure(_) => "key_import_failure",
            AppError::VerificationMismatch => "verification_mismatch",
            AppError::InvalidHandle(_) => "invalid_handle",
            AppError::UnknownIdentifier(_) => "unknown_identifier",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::Unprocessable(_) => "unprocessable",
            AppError::Database(_) => "database",
            AppError::HttpClient(_) => "http_client",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let error_type = self.error_type();
        let (status, error_message) = match &self {
            _ if self.is_authentication_failure() => (
                StatusCode::UNAUTHORIZED,
                AppError::Unauthorized.to_string(),
            ),
            AppError::InvalidHandle(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::UnknownIdentifier(_) | AppError::NotFound => {
                (StatusCode::NOT_FOUND, AppError::NotFound.to_string())
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::debug!(error = %self, error_type, "Request rejected");
        }

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_share_one_response() {
        let failures = [
            AppError::MalformedSignatureHeader("missing keyId".to_string()),
            AppError::KeyFetchFailure("HTTP 404".to_string()),
            AppError::KeyImportFailure("bad pem".to_string()),
            AppError::VerificationMismatch,
        ];

        for failure in failures {
            let response = failure.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn identifier_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::InvalidHandle("a b".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownIdentifier("42".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn invalid_handle_is_not_an_authentication_failure() {
        assert!(!AppError::InvalidHandle("x".to_string()).is_authentication_failure());
        assert!(AppError::VerificationMismatch.is_authentication_failure());
    }
}
