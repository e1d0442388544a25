//! CLI Output Envelopes
//!
//! Every `subpulse` client command prints exactly one JSON object to stdout:
//!
//! ```json
//! {"ok": true, "command": "ask", "data": ..., "meta": {"execution_ms": 12, "endpoint": "ws://..."}}
//! {"ok": false, "command": "ask", "error": {"code": "CONNECTION_FAILED", "message": "..."}}
//! ```
//!
//! Logs never go to stdout, so the envelope can always be parsed as-is.

use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

/// Successful command output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always `true`
    pub ok: bool,

    /// Subcommand that produced this output
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Failed command output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always `false`
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    pub fn from_error(command: impl Into<String>, err: &AnalyticsError) -> Self {
        Self::new(command, ErrorInfo { code: err.error_code().to_string(), message: err.message() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code, e.g. `VALIDATION_ERROR`
    pub code: String,

    pub message: String,
}

/// Timing and target of a client command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, endpoint: None }
    }

    pub fn with_endpoint(execution_ms: u64, endpoint: impl Into<String>) -> Self {
        Self { execution_ms, endpoint: Some(endpoint.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "ask",
            json!("Combined analysis for: 'x'"),
            Metadata::with_endpoint(42, "ws://localhost:8765"),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["command"], "ask");
        assert_eq!(json["meta"]["execution_ms"], 42);
        assert_eq!(json["meta"]["endpoint"], "ws://localhost:8765");
    }

    #[test]
    fn test_error_envelope_from_error() {
        let envelope = ErrorEnvelope::from_error("call", &AnalyticsError::validation("days out of range"));

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            json!({
                "ok": false,
                "command": "call",
                "error": {"code": "VALIDATION_ERROR", "message": "Invalid arguments: days out of range"}
            })
        );
    }

    #[test]
    fn test_metadata_omits_missing_endpoint() {
        let json = serde_json::to_string(&Metadata::new(5)).unwrap();
        assert_eq!(json, r#"{"execution_ms":5}"#);
    }
}
