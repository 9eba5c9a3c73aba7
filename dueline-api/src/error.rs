//! Error Types for the dueline API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Cache failures never reach this layer; the service degrades instead.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dueline_core::{ConfigError, DuelineError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request carries no usable owner identity
    Unauthorized,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested todo does not exist or belongs to another owner
    EntityNotFound,

    /// No route matches the request
    RouteNotFound,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidInput | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound | ErrorCode::RouteNotFound => StatusCode::NOT_FOUND,

            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::EntityNotFound => "Todo not found",
            ErrorCode::RouteNotFound => "Route not found",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, expected format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an error using the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // CONVENIENCE CONSTRUCTORS
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an InvalidFormat error naming the field and the expected shape.
    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
        .with_details(serde_json::json!({ "field": field, "expected": expected }))
    }

    pub fn entity_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn route_not_found(path: &str) -> Self {
        Self::new(ErrorCode::RouteNotFound, format!("No route for {}", path))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Map the domain taxonomy onto HTTP errors.
///
/// `NotFound` and validation failures pass through unchanged; storage
/// failures become opaque 5xx responses with the cause logged.
impl From<DuelineError> for ApiError {
    fn from(err: DuelineError) -> Self {
        match err {
            DuelineError::Storage(StorageError::NotFound { id, .. }) => {
                ApiError::entity_not_found(format!("Todo {} not found", id))
            }
            DuelineError::Validation(e) => ApiError::invalid_input(e.to_string()),
            DuelineError::Storage(StorageError::Unavailable { reason }) => {
                tracing::error!(reason = %reason, "Todo store unavailable");
                ApiError::service_unavailable("Todo store is temporarily unavailable")
            }
            DuelineError::Storage(e) => {
                tracing::error!(error = %e, "Todo store error");
                ApiError::database_error("Database operation failed")
            }
            DuelineError::Config(e) => {
                tracing::error!(error = %e, "Configuration error");
                ApiError::internal_error(e.to_string())
            }
            DuelineError::Cache(e) => {
                // The service degrades on cache failures; reaching here is a bug.
                tracing::error!(error = %e, "Cache error escaped the service layer");
                ApiError::from_code(ErrorCode::InternalError)
            }
            DuelineError::Internal { reason } => {
                tracing::error!(reason = %reason, "Internal error");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dueline_core::{OwnerId, TodoId, ValidationError};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ConnectionPoolExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err: ApiError = DuelineError::from(StorageError::NotFound {
            owner_id: OwnerId::new(42),
            id: TodoId::new(7),
        })
        .into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message.contains('7'));
        // Owner identity is not echoed back.
        assert!(!err.message.contains("42"));
    }

    #[test]
    fn test_validation_maps_to_400() {
        let err: ApiError = DuelineError::from(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("title"));
    }

    #[test]
    fn test_storage_failures_are_opaque() {
        let err: ApiError = DuelineError::from(StorageError::QueryFailed {
            reason: "relation \"todos\" does not exist".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("relation"));

        let err: ApiError = DuelineError::from(StorageError::Unavailable {
            reason: "pool timeout".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = DuelineError::internal("load task panicked").into();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_invalid_format_details() {
        let err = ApiError::invalid_format("due_at", "YYYY-MM-DD or RFC 3339");
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        let details = err.details.as_ref().map(|d| d["field"].clone());
        assert_eq!(details, Some(serde_json::json!("due_at")));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::entity_not_found("Todo 3 not found");
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("\"code\":\"ENTITY_NOT_FOUND\""));
        assert!(!json.contains("details"));

        let back: ApiError = serde_json::from_str(&json)?;
        assert_eq!(back, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::unauthorized("missing x-owner-id header");
        assert_eq!(err.to_string(), "Unauthorized: missing x-owner-id header");
    }
}
