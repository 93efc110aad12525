//! Error types for engine operations and rendering sessions.

use serde_json::{json, Value};
use thiserror::Error;

/// Failure reported by an engine backend.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine process could not be started
    #[error("failed to launch engine: {0}")]
    Launch(String),

    /// The connection to the engine process is gone
    #[error("engine connection lost: {0}")]
    Disconnected(String),

    /// A script evaluated in the page threw
    #[error("script error: {0}")]
    Script(String),

    /// The engine's own request timeout fired
    #[error("engine request timed out")]
    Timeout,

    /// Any other protocol-level failure
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Classified failure of a rendering session.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The page could not be rendered or captured
    #[error("screenshot failed: {message}")]
    ScreenshotFailed {
        message: String,
        data: Option<Value>,
    },

    /// Engine unavailable, failed to start, or shut down
    #[error("browser error: {0}")]
    Browser(String),

    /// Engine connection severed while a session was using it
    #[error("browser connection lost during {step}: {reason}")]
    EngineLost { step: &'static str, reason: String },

    /// Selector did not match any element
    #[error("selector not found: '{selector}'")]
    SelectorNotFound { selector: String },

    /// The request's timeout budget elapsed
    #[error("timed out during {step} (budget {budget_ms} ms)")]
    Timeout { step: &'static str, budget_ms: u64 },
}

impl RenderError {
    pub fn screenshot_failed(message: impl Into<String>) -> Self {
        Self::ScreenshotFailed {
            message: message.into(),
            data: None,
        }
    }

    pub fn selector_not_found(selector: impl Into<String>) -> Self {
        Self::SelectorNotFound {
            selector: selector.into(),
        }
    }

    /// Classify an engine failure that happened during `step`.
    pub fn from_engine(err: EngineError, step: &'static str, budget_ms: u64) -> Self {
        match err {
            EngineError::Launch(msg) => Self::Browser(msg),
            EngineError::Disconnected(reason) => Self::EngineLost { step, reason },
            EngineError::Timeout => Self::Timeout { step, budget_ms },
            EngineError::Script(msg) | EngineError::Protocol(msg) => Self::ScreenshotFailed {
                message: format!("{step}: {msg}"),
                data: None,
            },
        }
    }

    /// Whether the engine should be marked unhealthy and restarted.
    pub fn is_engine_lost(&self) -> bool {
        matches!(self, Self::EngineLost { .. })
    }

    /// Diagnostic detail attached to the RPC error.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::ScreenshotFailed { data, .. } => data.clone(),
            Self::Browser(_) => None,
            Self::EngineLost { step, .. } => Some(json!({ "step": step })),
            Self::SelectorNotFound { selector } => Some(json!({ "selector": selector })),
            Self::Timeout { step, budget_ms } => {
                Some(json!({ "step": step, "timeout_ms": budget_ms }))
            }
        }
    }
}

/// Outcome of a `screenshot` call that did not produce an image.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Anything that escaped classification
    #[error("internal error: {0}")]
    Internal(String),
}
