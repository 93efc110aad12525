//! Request parsing, envelope checks and method routing.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::protocol::{RpcError, RpcResponse, JSONRPC_VERSION};
use crate::service::ScreenshotService;
use crate::validate::validate;

/// Registered method with a short description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Static registry, kept in alphabetical order.
pub const METHODS: &[MethodInfo] = &[
    MethodInfo {
        name: "get_methods",
        description: "List the available methods",
    },
    MethodInfo {
        name: "ping",
        description: "Liveness check",
    },
    MethodInfo {
        name: "screenshot",
        description: "Render HTML and capture it as a PNG or JPEG image",
    },
];

/// A request that passed the envelope checks.
struct Call {
    method: String,
    params: Option<Value>,
    /// `None` marks a notification
    id: Option<Value>,
}

pub struct Dispatcher {
    service: Arc<ScreenshotService>,
}

impl Dispatcher {
    pub fn new(service: Arc<ScreenshotService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ScreenshotService> {
        &self.service
    }

    /// Handle one raw message. `None` means nothing is sent back.
    pub async fn handle(&self, raw: &[u8]) -> Option<RpcResponse> {
        let span = tracing::info_span!("rpc", request_id = %Uuid::new_v4());
        self.handle_inner(raw).instrument(span).await
    }

    async fn handle_inner(&self, raw: &[u8]) -> Option<RpcResponse> {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Unparsable request: {}", e);
                return Some(RpcResponse::error(Value::Null, RpcError::parse_error(&e)));
            }
        };

        let call = match parse_envelope(value) {
            Ok(call) => call,
            Err((id, err)) => {
                tracing::debug!("Invalid request: {}", err.message);
                return id.map(|id| RpcResponse::error(id, err));
            }
        };

        let started = Instant::now();
        let outcome = self.call(&call.method, call.params.as_ref()).await;
        match &outcome {
            Ok(_) => tracing::info!(
                method = %call.method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            ),
            Err(err) => tracing::warn!(
                method = %call.method,
                code = err.code.code(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request failed: {}",
                err.message
            ),
        }

        let Some(id) = call.id else {
            tracing::debug!(method = %call.method, "Notification handled, no response");
            return None;
        };
        Some(match outcome {
            Ok(result) => RpcResponse::result(id, result),
            Err(err) => RpcResponse::error(id, err),
        })
    }

    /// Run a method by name.
    pub async fn call(&self, method: &str, params: Option<&Value>) -> Result<Value, RpcError> {
        match method {
            "screenshot" => self.screenshot(params).await,
            "ping" => Ok(json!({ "pong": true, "status": "online" })),
            "get_methods" => Ok(json!({
                "methods": METHODS.iter().map(|m| m.name).collect::<Vec<_>>()
            })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn screenshot(&self, params: Option<&Value>) -> Result<Value, RpcError> {
        let req = validate(params, self.service.defaults()).map_err(|e| RpcError::from(&e))?;
        tracing::debug!(
            image_type = %req.image_type(),
            timeout_ms = req.timeout_ms,
            "Screenshot request validated"
        );

        match self.service.screenshot(req).await {
            Ok(result) => {
                tracing::debug!(
                    width = result.width,
                    height = result.height,
                    size_bytes = result.size_bytes,
                    "Screenshot captured"
                );
                serde_json::to_value(result).map_err(|e| {
                    tracing::error!("Failed to serialize screenshot result: {}", e);
                    RpcError::internal()
                })
            }
            Err(e) => {
                if matches!(e, crate::error::ServiceError::Internal(_)) {
                    tracing::error!("Screenshot failed with internal error: {}", e);
                }
                Err(RpcError::from(&e))
            }
        }
    }
}

/// Check the envelope shape. On failure returns the id to answer with,
/// `None` when the request was a notification.
fn parse_envelope(value: Value) -> Result<Call, (Option<Value>, RpcError)> {
    let Value::Object(mut obj) = value else {
        return Err((
            Some(Value::Null),
            RpcError::invalid_request("request must be a JSON object"),
        ));
    };

    let id = match obj.remove("id") {
        None => None,
        Some(id @ (Value::Null | Value::Number(_) | Value::String(_))) => Some(id),
        Some(_) => {
            return Err((
                Some(Value::Null),
                RpcError::invalid_request("id must be a string, number or null"),
            ))
        }
    };

    let invalid = |reason: &str| Err((id.clone(), RpcError::invalid_request(reason)));

    match obj.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => return invalid("jsonrpc must be \"2.0\""),
    }
    let method = match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => return invalid("method must be a non-empty string"),
    };
    let params = match obj.remove("params") {
        None | Some(Value::Null) => None,
        Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
        Some(_) => return invalid("params must be an object or array"),
    };

    Ok(Call { method, params, id })
}
