//! JSON-RPC 2.0 wire types.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

use crate::error::{RenderError, ServiceError};
use crate::validate::ValidationFailure;

pub const JSONRPC_VERSION: &str = "2.0";

/// Closed set of error codes. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ScreenshotFailed = -32001,
    BrowserError = -32002,
    SelectorNotFound = -32003,
    Timeout = -32004,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ScreenshotFailed => "Screenshot failed",
            Self::BrowserError => "Browser error",
            Self::SelectorNotFound => "Selector not found",
            Self::Timeout => "Timeout",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Error member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, detail: impl fmt::Display) -> Self {
        Self {
            code,
            message: format!("{}: {}", code.message(), detail),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn parse_error(err: &serde_json::Error) -> Self {
        Self::new(ErrorCode::ParseError, err)
            .with_data(Some(json!({ "line": err.line(), "column": err.column() })))
    }

    pub fn invalid_request(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidRequest, reason)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("'{}'", method))
            .with_data(Some(json!({ "method": method })))
    }

    /// Opaque to the caller; details stay in the logs.
    pub fn internal() -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: ErrorCode::InternalError.message().to_string(),
            data: None,
        }
    }
}

impl From<&ValidationFailure> for RpcError {
    fn from(failure: &ValidationFailure) -> Self {
        Self::new(ErrorCode::InvalidParams, failure).with_data(Some(failure.to_data()))
    }
}

impl From<&RenderError> for RpcError {
    fn from(err: &RenderError) -> Self {
        let code = match err {
            RenderError::ScreenshotFailed { .. } => ErrorCode::ScreenshotFailed,
            RenderError::Browser(_) | RenderError::EngineLost { .. } => ErrorCode::BrowserError,
            RenderError::SelectorNotFound { .. } => ErrorCode::SelectorNotFound,
            RenderError::Timeout { .. } => ErrorCode::Timeout,
        };
        Self {
            code,
            message: err.to_string(),
            data: err.data(),
        }
    }
}

impl From<&ServiceError> for RpcError {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Render(err) => err.into(),
            ServiceError::Internal(_) => Self::internal(),
        }
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    /// Echo of the request id; `null` when it could not be read
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            Outcome::Error(err) => Some(err.code),
            Outcome::Result(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.outcome {
            Outcome::Result(result) => {
                json!({ "jsonrpc": self.jsonrpc, "id": self.id, "result": result })
            }
            Outcome::Error(error) => {
                json!({ "jsonrpc": self.jsonrpc, "id": self.id, "error": error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_keep_wire_values() {
        let codes: Vec<i32> = [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::ScreenshotFailed,
            ErrorCode::BrowserError,
            ErrorCode::SelectorNotFound,
            ErrorCode::Timeout,
        ]
        .iter()
        .map(|c| c.code())
        .collect();
        assert_eq!(
            codes,
            vec![-32700, -32600, -32601, -32602, -32603, -32001, -32002, -32003, -32004]
        );
    }

    #[test]
    fn response_carries_exactly_one_outcome() {
        let ok = serde_json::to_value(RpcResponse::result(json!(1), json!({"pong": true}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {"pong": true}}));

        let err = serde_json::to_value(RpcResponse::error(
            Value::Null,
            RpcError::method_not_found("nope"),
        ))
        .unwrap();
        assert_eq!(err["error"]["code"], -32601);
        assert!(err.get("result").is_none());
        assert_eq!(err["id"], Value::Null);
    }

    #[test]
    fn serialized_envelope_matches_to_value() {
        let resp = RpcResponse::error(json!("a"), RpcError::internal());
        assert_eq!(serde_json::to_value(&resp).unwrap(), resp.to_value());
    }

    #[test]
    fn internal_error_hides_detail() {
        let err = RpcError::from(&ServiceError::Internal("secret stack trace".into()));
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("secret"));
        assert!(err.data.is_none());
    }

    #[test]
    fn render_errors_map_to_domain_codes() {
        let lost = RenderError::EngineLost {
            step: "capture",
            reason: "gone".into(),
        };
        assert_eq!(RpcError::from(&lost).code, ErrorCode::BrowserError);

        let missing = RpcError::from(&RenderError::selector_not_found("#x"));
        assert_eq!(missing.code, ErrorCode::SelectorNotFound);
        assert_eq!(missing.data, Some(json!({"selector": "#x"})));
    }

    #[test]
    fn parse_error_reports_position() {
        let err = serde_json::from_slice::<Value>(b"{\n  oops").unwrap_err();
        let rpc = RpcError::parse_error(&err);
        assert_eq!(rpc.code, ErrorCode::ParseError);
        assert_eq!(rpc.data.unwrap()["line"], 2);
    }
}
