//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: errors that cross the HTTP boundary. They implement actix's
//!   `ResponseError` so a handler can return `Result<HttpResponse, AppError>` and the
//!   framework turns failures into JSON responses.
//! - **RelayError**: errors raised inside a relay session (remote connection, playback
//!   device, enrichment lookup). These never become HTTP responses; the session logs
//!   them and decides whether to keep going or tear down.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Data**: Each variant carries a message describing what went wrong
//! - **Pattern matching**: Use `match` to treat each kind differently
//!
//! ### Traits for Error Conversion
//! - **Display trait**: Defines how errors are formatted as strings
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **std::error::Error**: Lets `RelayError` flow into `anyhow` and `?`

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **ConfigError**: The server is missing configuration it needs (500 errors)
/// - **ServiceUnavailable**: A capacity limit was reached (503 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ServiceUnavailable("Maximum concurrent sessions (10) reached".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (failed WebSocket upgrade, etc.)
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// The server cannot accept more work right now
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts an `AppError` into an HTTP response.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - ServiceUnavailable → 503 (Service Unavailable)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent sessions (10) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Map each error type to HTTP status code, error type, and message
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,  // 503
                "service_unavailable",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Lets a failed `ws::start` upgrade be reported through the same JSON shape.
impl From<actix_web::Error> for AppError {
    fn from(err: actix_web::Error) -> Self {
        AppError::Internal(format!("WebSocket upgrade failed: {}", err))
    }
}

/// Errors raised while a relay session is running.
///
/// ## Error Categories:
/// - **Transport**: The realtime connection (or its writer/reader task) failed
/// - **Protocol**: The remote side sent something we could not understand
/// - **Enrichment**: A weather lookup step failed (always converted to text later)
/// - **Device**: The capture source or playback device refused an operation
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    Transport(String),
    Protocol(String),
    Enrichment(String),
    Device(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            // Enrichment messages are folded into the assistant's context verbatim,
            // so they are displayed without a prefix.
            RelayError::Enrichment(msg) => write!(f, "{}", msg),
            RelayError::Device(msg) => write!(f, "Device error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

/// Type alias for Results that use the HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

/// Type alias for Results inside a relay session.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        let unavailable = AppError::ServiceUnavailable("full".to_string());
        assert_eq!(unavailable.error_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let config = AppError::ConfigError("missing key".to_string());
        assert_eq!(config.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_relay_error_display() {
        assert_eq!(
            RelayError::Transport("socket reset".to_string()).to_string(),
            "Transport error: socket reset"
        );
        // Enrichment text is passed through untouched
        assert_eq!(
            RelayError::Enrichment("Could not find location for city: Atlantis".to_string()).to_string(),
            "Could not find location for city: Atlantis"
        );
    }
}
