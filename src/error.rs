use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

/// The primary error type for the application.
///
/// This enum consolidates all possible errors that can occur within the
/// application, providing a unified way to handle and respond to failures.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests.
    BadRequest(String),
    /// For when a requested resource is not found.
    NotFound(String),
    /// For when a request conflicts with the current state of the server,
    /// e.g. starting a scan for a library that is already scanning.
    Conflict(String),
    /// For when a service is temporarily unavailable.
    ServiceUnavailable(String),
    /// For errors related to database operations.
    Database(String),
    /// For errors talking to the object store.
    Storage(String),
    /// For when a presigned URL is expired or its signature does not verify.
    Forbidden(String),
    /// For a `Range` request that lies entirely beyond the object's length.
    /// Carries the true length for the `Content-Range: bytes */len` header.
    RangeNotSatisfiable {
        length: u64,
    },
    /// For when a specific field in a request fails validation.
    ValidationError {
        field: String,
        message: String,
    },
    /// For errors related to I/O operations.
    IoError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::RangeNotSatisfiable { length } => {
                write!(f, "Requested range not satisfiable (object length {})", length)
            }
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 416 carries a Content-Range header with the true object length and
        // therefore does not fit the tuple shape below.
        if let AppError::RangeNotSatisfiable { length } = self {
            let body = json!({
                "error": {
                    "code": "RANGE_NOT_SATISFIABLE",
                    "message": format!("requested range exceeds object length {}", length),
                },
                "status": StatusCode::RANGE_NOT_SATISFIABLE.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", length))],
                Json(body),
            )
                .into_response();
        }

        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                let error_id = uuid::Uuid::new_v4();
                tracing::error!("Error ID: {}", error_id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(json!({ "details": msg })),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "An object storage error occurred".to_string(),
                    Some(json!({ "details": msg })),
                )
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::RangeNotSatisfiable { .. } => unreachable!("handled above"),
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::IoError(msg) => {
                tracing::error!("I/O error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An I/O error occurred".to_string(),
                    Some(json!({ "details": msg })),
                )
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            _ => AppError::Database(format!("Database error: {}", err)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<globset::Error> for AppError {
    fn from(err: globset::Error) -> Self {
        AppError::BadRequest(format!("Invalid glob pattern: {}", err))
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Request-level validation helpers shared by the tag routes.
pub mod validation {
    use super::*;

    pub const MAX_TAGS_PER_REQUEST: usize = 100;
    pub const MAX_TAG_LENGTH: usize = 128;

    /// Trims and validates a client-supplied tag list.
    pub fn validate_tags(tags: &[String]) -> AppResult<Vec<String>> {
        if tags.len() > MAX_TAGS_PER_REQUEST {
            return Err(AppError::ValidationError {
                field: "tags".to_string(),
                message: format!("too many tags (max {})", MAX_TAGS_PER_REQUEST),
            });
        }
        let mut cleaned = Vec::with_capacity(tags.len());
        for t in tags {
            let tt = t.trim();
            if tt.is_empty() {
                return Err(AppError::ValidationError {
                    field: "tags".to_string(),
                    message: "tags must be non-empty".to_string(),
                });
            }
            if tt.len() > MAX_TAG_LENGTH {
                return Err(AppError::ValidationError {
                    field: "tags".to_string(),
                    message: format!("tag too long (max {})", MAX_TAG_LENGTH),
                });
            }
            cleaned.push(tt.to_string());
        }
        Ok(cleaned)
    }

    /// Validates a pagination limit, returning the clamped effective value.
    pub fn validate_limit(limit: Option<i64>, default: i64, max: i64) -> AppResult<i64> {
        match limit {
            None => Ok(default),
            Some(v) if v <= 0 => Err(AppError::ValidationError {
                field: "limit".to_string(),
                message: format!("limit must be positive, got {}", v),
            }),
            Some(v) => Ok(v.min(max)),
        }
    }
}
