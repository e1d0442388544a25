//! Wire Protocol Messages
//!
//! Every frame on the link is a single JSON text message. The first frame a
//! client sends is an [`AuthRequest`]; the server answers with one
//! [`AuthResponse`]. After that the client sends [`Request`]s and the server
//! answers each one with a [`Response`] carrying the same `id`.
//!
//! # Message Contract
//! - Auth: `{"api_key": "...", "client_type": "...", "version": "..."}`
//!   → `{"status": "authenticated"}` or `{"error": "..."}`
//! - List: `{"method": "tools/list", "id": 1}` → `{"id": 1, "result": [...]}`
//! - Call: `{"method": "tools/call", "params": {"name": "...", "arguments": {...}}, "id": 2}`
//!   → `{"id": 2, "result": ...}` or `{"id": 2, "error": "...", "code": "..."}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AnalyticsError, Result};

/// Method name for listing the capability catalog
pub const METHOD_LIST_TOOLS: &str = "tools/list";

/// Method name for invoking one capability
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// Client type announced in the auth handshake
pub const CLIENT_TYPE: &str = "mcp_client";

/// Protocol version announced in the auth handshake
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Status value of a successful auth acknowledgement
const STATUS_AUTHENTICATED: &str = "authenticated";

/// First frame sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Shared secret checked against the server's credential set
    /// WARNING: Sensitive data, do not log
    #[serde(default)]
    pub api_key: String,

    /// Free-form client kind, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,

    /// Client protocol version, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AuthRequest {
    /// Build the handshake frame this crate's client sends
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client_type: Some(CLIENT_TYPE.to_string()),
            version: Some(PROTOCOL_VERSION.to_string()),
        }
    }
}

/// Server acknowledgement of the auth handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResponse {
    /// Successful acknowledgement
    #[must_use]
    pub fn authenticated() -> Self {
        Self { status: Some(STATUS_AUTHENTICATED.to_string()), error: None }
    }

    /// Rejection with a reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { status: None, error: Some(reason.into()) }
    }

    /// Interpret the acknowledgement from the client's side
    pub fn into_result(self) -> Result<()> {
        if let Some(reason) = self.error {
            return Err(AnalyticsError::authentication(reason));
        }
        match self.status.as_deref() {
            Some(STATUS_AUTHENTICATED) => Ok(()),
            other => Err(AnalyticsError::protocol(format!(
                "Unexpected auth acknowledgement status: {other:?}"
            ))),
        }
    }
}

/// Parameters of a `tools/call` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub name: String,

    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Client request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<CallParams>,

    #[serde(default)]
    pub id: Value,
}

impl Request {
    /// `tools/list` request
    #[must_use]
    pub fn list_tools(id: u64) -> Self {
        Self { method: METHOD_LIST_TOOLS.to_string(), params: None, id: Value::from(id) }
    }

    /// `tools/call` request
    pub fn call_tool(id: u64, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            method: METHOD_CALL_TOOL.to_string(),
            params: Some(CallParams { name: name.into(), arguments }),
            id: Value::from(id),
        }
    }
}

/// Server response frame
///
/// Exactly one of `result` / `error` is set on a well-formed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Stable error code accompanying `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Response {
    /// Successful response
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self { id, result: Some(result), error: None, code: None }
    }

    /// Error response carrying the error's bare detail and code
    #[must_use]
    pub fn failure(id: Value, err: &AnalyticsError) -> Self {
        Self {
            id,
            result: None,
            error: Some(err.detail().to_string()),
            code: Some(err.error_code().to_string()),
        }
    }

    /// Build from an outcome
    #[must_use]
    pub fn from_outcome(id: Value, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(err) => Self::failure(id, &err),
        }
    }

    /// Interpret the response from the client's side
    pub fn into_result(self) -> Result<Value> {
        match (self.result, self.error) {
            (None, Some(error)) => Err(AnalyticsError::from_code(self.code.as_deref(), error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(AnalyticsError::protocol("Response carries neither result nor error")),
            (Some(_), Some(_)) => Err(AnalyticsError::protocol("Response carries both result and error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_request_shape() {
        let json = serde_json::to_value(AuthRequest::new("k")).unwrap();
        assert_eq!(json, json!({"api_key": "k", "client_type": "mcp_client", "version": "1.0.0"}));
    }

    #[test]
    fn test_auth_response_shapes() {
        assert_eq!(
            serde_json::to_value(AuthResponse::authenticated()).unwrap(),
            json!({"status": "authenticated"})
        );
        assert_eq!(
            serde_json::to_value(AuthResponse::rejected("Authentication failed")).unwrap(),
            json!({"error": "Authentication failed"})
        );
    }

    #[test]
    fn test_auth_response_into_result() {
        assert!(AuthResponse::authenticated().into_result().is_ok());
        let err = AuthResponse::rejected("nope").into_result().unwrap_err();
        assert!(matches!(err, AnalyticsError::Authentication(_)));
        let odd = AuthResponse { status: Some("pending".into()), error: None };
        assert!(matches!(odd.into_result(), Err(AnalyticsError::Protocol(_))));
    }

    #[test]
    fn test_call_request_shape() {
        let mut args = Map::new();
        args.insert("days".into(), json!(7));
        let json = serde_json::to_value(Request::call_tool(3, "get_subscription_summary", args)).unwrap();
        assert_eq!(
            json,
            json!({
                "method": "tools/call",
                "params": {"name": "get_subscription_summary", "arguments": {"days": 7}},
                "id": 3
            })
        );
    }

    #[test]
    fn test_list_request_omits_params() {
        let json = serde_json::to_value(Request::list_tools(1)).unwrap();
        assert_eq!(json, json!({"method": "tools/list", "id": 1}));
    }

    #[test]
    fn test_failure_response_shape() {
        let resp = Response::failure(json!(9), &AnalyticsError::protocol("Unknown method"));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": 9, "error": "Unknown method", "code": "PROTOCOL_ERROR"})
        );
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(Response::success(json!(1), json!("ok")).into_result().unwrap(), json!("ok"));

        let err = Response::failure(json!(1), &AnalyticsError::validation("days"))
            .into_result()
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));

        let empty = Response { id: json!(1), result: None, error: None, code: None };
        assert!(matches!(empty.into_result(), Err(AnalyticsError::Protocol(_))));
    }

    #[test]
    fn test_bare_error_payload_is_backend_error() {
        let resp: Response = serde_json::from_str(r#"{"id": 4, "error": "Table missing"}"#).unwrap();
        assert_eq!(resp.id, json!(4));
        assert!(matches!(resp.into_result(), Err(AnalyticsError::Backend(_))));
    }
}
