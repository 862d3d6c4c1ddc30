//! JSON-RPC 2.0 envelopes and wire error codes.
//!
//! The paywall reports refusals and faults as JSON-RPC errors. Two
//! server-defined codes are used on top of the standard ones:
//!
//! - [`AUTHORIZATION_REQUIRED`] (`-32003`) - missing/invalid token, or the
//!   caller must buy credits
//! - [`SERVER_ERROR`] (`-32002`) - any other paywall fault, with a generic message

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::DenialReason;

/// The protocol version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Generic server-side fault.
pub const SERVER_ERROR: i64 = -32002;
/// Authorization or payment required.
pub const AUTHORIZATION_REQUIRED: i64 = -32003;

/// Stable, machine-readable reason carried in `error.data.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorReason {
    /// No bearer token was supplied.
    MissingToken,
    /// The ledger rejected the token.
    InvalidToken,
    /// The caller's balance cannot cover the call.
    InsufficientBalance,
    /// The caller holds no subscription to the agent's plan.
    NotSubscribed,
    /// The ledger could not be reached.
    LedgerUnavailable,
    /// The ledger failed in some other way.
    LedgerError,
    /// A handler was registered with an unusable descriptor.
    InvalidDescriptor,
    /// The handler itself failed.
    HandlerError,
}

impl ErrorReason {
    /// Returns the `snake_case` wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientBalance => "insufficient_balance",
            Self::NotSubscribed => "not_subscribed",
            Self::LedgerUnavailable => "ledger_unavailable",
            Self::LedgerError => "ledger_error",
            Self::InvalidDescriptor => "invalid_descriptor",
            Self::HandlerError => "handler_error",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DenialReason> for ErrorReason {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::MissingToken => Self::MissingToken,
            DenialReason::InvalidToken => Self::InvalidToken,
            DenialReason::InsufficientBalance => Self::InsufficientBalance,
            DenialReason::NotSubscribed => Self::NotSubscribed,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error without data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32700` for a body that is not JSON.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    /// `-32600` for a body that is JSON but not a request.
    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid request")
    }

    /// `-32601` for an unknown method or handler name.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602` for missing or malformed parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// Returns `data.reason`, if present.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.data.as_ref()?.get("reason")?.as_str()
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for JsonRpcError {}

/// An inbound JSON-RPC request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request with the given id.
    #[must_use]
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Returns `true` when no response is expected.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An outbound JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The id of the request being answered (`null` if it was unreadable).
    pub id: Value,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifications_have_no_id() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(req.is_notification());
        assert!(!JsonRpcRequest::new(1, "tools/list", json!({})).is_notification());
    }

    #[test]
    fn error_response_shape() {
        let err = JsonRpcError::new(AUTHORIZATION_REQUIRED, "Payment required")
            .with_data(json!({"reason": ErrorReason::InsufficientBalance}));
        assert_eq!(err.reason(), Some("insufficient_balance"));

        let resp = JsonRpcResponse::failure(json!(7), err);
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "error": {
                    "code": -32003,
                    "message": "Payment required",
                    "data": {"reason": "insufficient_balance"}
                }
            })
        );
    }

    #[test]
    fn denial_reasons_keep_their_codes() {
        for reason in [
            DenialReason::MissingToken,
            DenialReason::InvalidToken,
            DenialReason::InsufficientBalance,
            DenialReason::NotSubscribed,
        ] {
            assert_eq!(ErrorReason::from(reason).as_str(), reason.as_str());
        }
    }
}
