//! Error types for the connection router.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Resolution errors are request-scoped: they describe why one request could not get a
//! connection and never reflect a change in shared registry state.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Unknown provider: '{provider}' is not a registered dialect")]
    UnknownProvider { provider: String },

    #[error("Unknown named connection: '{name}'")]
    UnknownNamedConnection { name: String },

    #[error("No default connection has been registered")]
    NoDefaultConnection,

    #[error("Invalid connection name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Failed to open connection: {message}")]
    Open {
        message: String,
        suggestion: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Connection pool exhausted ({max_connections} connections in use)")]
    PoolExhausted { max_connections: u32 },

    #[error("Request scope is closed: {message}")]
    ScopeClosed { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unknown provider error.
    pub fn unknown_provider(provider: impl Into<String>) -> Self {
        Self::UnknownProvider {
            provider: provider.into(),
        }
    }

    /// Create an unknown named connection error.
    pub fn unknown_named_connection(name: impl Into<String>) -> Self {
        Self::UnknownNamedConnection { name: name.into() }
    }

    /// Create an invalid name error (registration time).
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an open error with a helpful suggestion.
    pub fn open(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Open {
            message: message.into(),
            suggestion: suggestion.into(),
            source: None,
        }
    }

    /// Create an open error wrapping the underlying driver failure.
    pub fn open_with_source(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: sqlx::Error,
    ) -> Self {
        Self::Open {
            message: message.into(),
            suggestion: suggestion.into(),
            source: Some(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(max_connections: u32) -> Self {
        Self::PoolExhausted { max_connections }
    }

    /// Create a scope closed error.
    pub fn scope_closed(message: impl Into<String>) -> Self {
        Self::ScopeClosed {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Open { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::UnknownNamedConnection { .. } => {
                Some("Register the connection at startup or check the requested name")
            }
            Self::UnknownProvider { .. } => Some("Register the dialect before referencing it"),
            Self::NoDefaultConnection => {
                Some("Register a default connection or send an explicit connection hint")
            }
            Self::PoolExhausted { .. } => {
                Some("Retry later or raise max_connections for this connection")
            }
            _ => None,
        }
    }

    /// True for failures computed purely from the hint and registry contents.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownProvider { .. }
                | Self::UnknownNamedConnection { .. }
                | Self::NoDefaultConnection
        )
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Open { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::UnknownNamedConnection { .. } => "unknown_named_connection",
            Self::NoDefaultConnection => "no_default_connection",
            Self::InvalidName { .. } => "invalid_name",
            Self::Open { .. } => "open_error",
            Self::Timeout { .. } => "timeout",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::ScopeClosed { .. } => "scope_closed",
            Self::Database { .. } => "database_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status used when the error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownProvider { .. }
            | Self::NoDefaultConnection
            | Self::InvalidName { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownNamedConnection { .. } => StatusCode::NOT_FOUND,
            Self::Open { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } | Self::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ScopeClosed { .. } | Self::Database { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(ref msg) => {
                let message = msg.to_string();
                DbError::open_with_source(
                    message,
                    "Check the connection string format and credentials",
                    err,
                )
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::PoolClosed => DbError::open_with_source(
                "Connection pool is closed",
                "The pool was closed by cleanup or shutdown; open a new connection",
                err,
            ),
            sqlx::Error::Io(ref io_err) => {
                let message = format!("I/O error: {}", io_err);
                DbError::open_with_source(
                    message,
                    "Check network connectivity and database server status",
                    err,
                )
            }
            sqlx::Error::Tls(ref tls_err) => {
                let message = format!("TLS error: {}", tls_err);
                DbError::open_with_source(
                    message,
                    "Verify TLS configuration and certificates",
                    err,
                )
            }
            sqlx::Error::Protocol(ref msg) => {
                let message = format!("Protocol error: {}", msg);
                DbError::open_with_source(message, "Check database server compatibility", err)
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for routing and database operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                suggestion: self.suggestion(),
            },
        };
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":{"code":"internal_error","message":"Failed to encode error"}}"#.to_string()
        });

        (status, [(header::CONTENT_TYPE, "application/json")], json).into_response()
    }
}
