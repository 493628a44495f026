//! Error types for Quire
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
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

    /// Integrity constraint violated (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Turn unique/check constraint failures into `Conflict`
    ///
    /// Any other database error is passed through unchanged.
    pub fn from_integrity(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return AppError::Conflict(format!("{what} already exists"));
                }
                sqlx::error::ErrorKind::CheckViolation => {
                    return AppError::Conflict(format!("{what} violates a constraint"));
                }
                _ => {}
            }
        }
        AppError::Database(err)
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "invalid_signature",
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string(), "forbidden"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), "conflict"),
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), "federation"),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string(), "http_client"),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    "database",
                )
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal",
                )
            }
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

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
    fn conflict_maps_to_409() {
        let response = AppError::Conflict("favorite already exists".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn forbidden_and_unauthorized_are_distinct() {
        assert_eq!(
            AppError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn non_database_errors_pass_through_integrity_mapping() {
        let err = AppError::from_integrity(sqlx::Error::RowNotFound, "favorite");
        assert!(matches!(err, AppError::Database(sqlx::Error::RowNotFound)));
    }
}
