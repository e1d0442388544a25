//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Subpulse.
//! All errors are structured and map to stable error codes that travel over the wire.
//!
//! # Error Categories
//! - `Authentication`: Bad or missing credentials (never retried)
//! - `Connection`: Transport refused, timed out, or closed
//! - `Validation`: Arguments outside the declared schema
//! - `Backend`: The data backend reported a failure
//! - `Protocol`: Malformed frames, unknown methods, malformed responses
//! - `Config`: Missing or invalid configuration

use thiserror::Error;

/// Main error type for Subpulse operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    /// Credentials were rejected or missing
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server could not be reached or the link dropped
    #[error("Could not reach server: {0}")]
    Connection(String),

    /// Arguments did not satisfy the operation schema
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// The data backend reported an error
    #[error("Backend reported an error: {0}")]
    Backend(String),

    /// Malformed frame, unknown method, or malformed response payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error (missing variable, unreadable profile, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AnalyticsError {
    /// Convert error to error code string for wire and JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::Connection(_) => "CONNECTION_FAILED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Human-readable message including the category prefix
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The bare detail without the category prefix
    ///
    /// This is what goes into the `error` field of a wire response; the
    /// category travels separately as `code`.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Authentication(d)
            | Self::Connection(d)
            | Self::Validation(d)
            | Self::Backend(d)
            | Self::Protocol(d)
            | Self::Config(d) => d,
        }
    }

    /// Rebuild an error from a wire `code` and detail
    ///
    /// Unknown or missing codes are treated as backend errors, which is how a
    /// bare `{"error": "..."}` payload from an older server is reported.
    #[must_use]
    pub fn from_code(code: Option<&str>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            Some("AUTHENTICATION_FAILED") => Self::Authentication(detail),
            Some("CONNECTION_FAILED") => Self::Connection(detail),
            Some("VALIDATION_ERROR") => Self::Validation(detail),
            Some("PROTOCOL_ERROR") => Self::Protocol(detail),
            Some("CONFIG_ERROR") => Self::Config(detail),
            _ => Self::Backend(detail),
        }
    }

    /// Whether a connect attempt that failed with this error may be retried
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type alias for Subpulse operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;
