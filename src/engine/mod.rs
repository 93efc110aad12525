//! Rendering engine abstraction.
//!
//! [`Launcher`] starts an engine process, [`Engine`] hands out isolated
//! pages, and [`EnginePage`] is the minimal operation set a rendering
//! session needs. Only [`EngineHandle`] owns a live engine.

mod handle;

#[cfg(test)]
pub(crate) mod fake;

pub use handle::{EngineHandle, EngineState, Lease};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::EngineError;
use crate::models::{ImageType, Rect, Viewport, WaitUntil};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Per-page setup applied before any content is loaded.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub viewport: Viewport,
    /// Device scale factor
    pub scale: f64,
    pub extra_http_headers: BTreeMap<String, String>,
}

/// Region and format of a pixel capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub image_type: ImageType,
    /// JPEG quality; only set for JPEG
    pub quality: Option<u8>,
    /// Transparent default background; only set for PNG
    pub omit_background: bool,
    /// `None` captures the current viewport
    pub clip: Option<Rect>,
}

/// Starts fresh engine processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> EngineResult<Arc<dyn Engine>>;
}

/// A running engine process.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create an isolated browsing context with one page in it.
    async fn open_page(&self, options: &PageOptions) -> EngineResult<Box<dyn EnginePage>>;

    /// Engine product/version string; doubles as a health probe.
    async fn version(&self) -> EngineResult<String>;

    /// Flips to `false` (or closes) when the connection to the process is lost.
    fn liveness(&self) -> watch::Receiver<bool>;

    /// Terminate the process.
    async fn shutdown(&self) -> EngineResult<()>;
}

/// One page inside its own isolated context.
#[async_trait]
pub trait EnginePage: Send + Sync {
    /// Replace the document with `html` without a network fetch.
    async fn load_html(&self, html: &str) -> EngineResult<()>;

    /// Resolve once the document reached the completion signal.
    async fn wait_until(&self, condition: WaitUntil) -> EngineResult<()>;

    /// Append a `<style>` element to the document head.
    async fn add_style(&self, css: &str) -> EngineResult<()>;

    /// Evaluate a script in the page, awaiting returned promises.
    async fn evaluate(&self, script: &str) -> EngineResult<Value>;

    /// Page-coordinate bounding box of the first match, if any.
    async fn query_selector(&self, selector: &str) -> EngineResult<Option<Rect>>;

    /// Whether the document can still be rasterized.
    async fn is_renderable(&self) -> EngineResult<bool>;

    /// Full scrollable document size in CSS pixels.
    async fn content_size(&self) -> EngineResult<(f64, f64)>;

    /// Capture pixels and return the encoded image bytes.
    async fn capture(&self, spec: &CaptureSpec) -> EngineResult<Vec<u8>>;

    /// Close the page and dispose its context.
    async fn close(self: Box<Self>) -> EngineResult<()>;
}
