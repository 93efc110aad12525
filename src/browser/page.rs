//! One CDP page inside its own browser context.

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::dom::Rgba;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDefaultBackgroundColorOverrideParams, SetDeviceMetricsOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, SetDocumentContentParams, Viewport,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::engine::{CaptureSpec, EnginePage, EngineResult, PageOptions};
use crate::error::EngineError;
use crate::models::{ImageType, Rect, WaitUntil};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);

const READY_PROBE: &str = "({ state: document.readyState, \
    resources: performance.getEntriesByType('resource').length })";

const RENDERABLE_PROBE: &str =
    "document.readyState !== 'loading' && !!document.documentElement && !!document.body";

/// Map a chromiumoxide failure onto the engine error taxonomy.
pub(crate) fn classify(err: CdpError, alive: &watch::Receiver<bool>) -> EngineError {
    match err {
        CdpError::JavascriptException(details) => {
            let message = details
                .exception
                .as_ref()
                .and_then(|exception| exception.description.clone())
                .unwrap_or_else(|| details.text.clone());
            EngineError::Script(message)
        }
        CdpError::Timeout => EngineError::Timeout,
        CdpError::Ws(e) => EngineError::Disconnected(e.to_string()),
        other if !*alive.borrow() => EngineError::Disconnected(other.to_string()),
        other => EngineError::Protocol(other.to_string()),
    }
}

#[derive(Deserialize)]
struct ReadyState {
    state: String,
    resources: u64,
}

/// Owns a CDP browser context until it is disposed.
///
/// Dropping an undisposed guard disposes the context in the background,
/// which also closes every target inside it. The id is only released once
/// `Target.disposeBrowserContext` has answered, so a cancelled [`dispose`]
/// still falls back to `Drop`.
///
/// [`dispose`]: ContextGuard::dispose
pub(crate) struct ContextGuard {
    id: Option<BrowserContextId>,
    browser: Arc<RwLock<Browser>>,
    alive: watch::Receiver<bool>,
}

impl ContextGuard {
    pub(crate) fn new(
        id: BrowserContextId,
        browser: Arc<RwLock<Browser>>,
        alive: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: Some(id),
            browser,
            alive,
        }
    }

    pub(crate) async fn dispose(&mut self) -> EngineResult<()> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        let disposed = self.browser.read().await.dispose_browser_context(id).await;
        self.id = None;
        disposed.map(|_| ()).map_err(|e| classify(e, &self.alive))
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if !*self.alive.borrow() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let browser = self.browser.clone();
        runtime.spawn(async move {
            match browser.read().await.dispose_browser_context(id).await {
                Ok(_) => tracing::debug!("Disposed abandoned browser context"),
                Err(e) => tracing::debug!("Failed to dispose abandoned browser context: {}", e),
            }
        });
    }
}

pub struct ChromiumPage {
    page: Page,
    context: ContextGuard,
    alive: watch::Receiver<bool>,
}

impl ChromiumPage {
    pub(crate) fn new(page: Page, context: ContextGuard, alive: watch::Receiver<bool>) -> Self {
        Self {
            page,
            context,
            alive,
        }
    }

    fn err(&self, e: CdpError) -> EngineError {
        classify(e, &self.alive)
    }

    /// Apply viewport, scale factor and extra headers before any content loads.
    pub async fn configure(&self, options: &PageOptions) -> EngineResult<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(options.viewport.width as i64)
            .height(options.viewport.height as i64)
            .device_scale_factor(options.scale)
            .mobile(false)
            .build()
            .map_err(|e| EngineError::Protocol(format!("failed to build viewport params: {}", e)))?;
        self.page.execute(metrics).await.map_err(|e| self.err(e))?;

        if !options.extra_http_headers.is_empty() {
            self.page
                .execute(NetworkEnableParams::default())
                .await
                .map_err(|e| self.err(e))?;
            let headers = serde_json::to_value(&options.extra_http_headers)
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
            self.page
                .execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(|e| self.err(e))?;
        }
        Ok(())
    }

    async fn eval(&self, expression: &str) -> EngineResult<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| EngineError::Protocol(format!("failed to build evaluate params: {}", e)))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| self.err(e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn ready_state(&self) -> EngineResult<ReadyState> {
        let value = self.eval(READY_PROBE).await?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::Protocol(format!("unexpected readyState probe: {}", e)))
    }

    async fn set_transparent_background(&self, transparent: bool) -> EngineResult<()> {
        let color = transparent.then_some(Rgba {
            r: 0,
            g: 0,
            b: 0,
            a: Some(0.0),
        });
        self.page
            .execute(SetDefaultBackgroundColorOverrideParams { color })
            .await
            .map_err(|e| self.err(e))?;
        Ok(())
    }
}

#[async_trait]
impl EnginePage for ChromiumPage {
    async fn load_html(&self, html: &str) -> EngineResult<()> {
        let frame = self
            .page
            .mainframe()
            .await
            .map_err(|e| self.err(e))?
            .ok_or_else(|| EngineError::Protocol("page has no main frame".into()))?;
        self.page
            .execute(SetDocumentContentParams::new(frame, html))
            .await
            .map_err(|e| self.err(e))?;
        Ok(())
    }

    async fn wait_until(&self, condition: WaitUntil) -> EngineResult<()> {
        let mut last_count = None;
        let mut quiet_since = tokio::time::Instant::now();

        loop {
            let probe = self.ready_state().await?;
            let done = match condition {
                WaitUntil::DomContentLoaded => probe.state != "loading",
                WaitUntil::Load => probe.state == "complete",
                WaitUntil::NetworkIdle => {
                    if probe.state != "complete" {
                        last_count = None;
                        false
                    } else if last_count != Some(probe.resources) {
                        last_count = Some(probe.resources);
                        quiet_since = tokio::time::Instant::now();
                        false
                    } else {
                        quiet_since.elapsed() >= NETWORK_IDLE_QUIET
                    }
                }
            };
            if done {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn add_style(&self, css: &str) -> EngineResult<()> {
        let css = Value::String(css.to_string());
        let script = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {css}; \
             (document.head || document.documentElement).appendChild(style); }})()"
        );
        self.eval(&script).await.map(|_| ())
    }

    async fn evaluate(&self, script: &str) -> EngineResult<Value> {
        self.eval(script).await
    }

    async fn query_selector(&self, selector: &str) -> EngineResult<Option<Rect>> {
        let selector = Value::String(selector.to_string());
        let script = format!(
            "(() => {{ const el = document.querySelector({selector}); \
             if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.left + window.scrollX, y: r.top + window.scrollY, \
                       width: r.width, height: r.height }}; }})()"
        );
        let value = self.eval(&script).await?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::Protocol(format!("unexpected bounding box: {}", e)))
    }

    async fn is_renderable(&self) -> EngineResult<bool> {
        Ok(self.eval(RENDERABLE_PROBE).await?.as_bool().unwrap_or(false))
    }

    async fn content_size(&self) -> EngineResult<(f64, f64)> {
        let metrics = self.page.layout_metrics().await.map_err(|e| self.err(e))?;
        let size = metrics.css_content_size;
        Ok((size.width, size.height))
    }

    async fn capture(&self, spec: &CaptureSpec) -> EngineResult<Vec<u8>> {
        let mut builder = CaptureScreenshotParams::builder();
        builder = match spec.image_type {
            ImageType::Png => builder.format(CaptureScreenshotFormat::Png),
            ImageType::Jpeg => builder
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(spec.quality.unwrap_or(80) as i64),
        };
        if let Some(rect) = spec.clip {
            builder = builder.capture_beyond_viewport(true).clip(Viewport {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                scale: 1.0,
            });
        }

        if spec.omit_background {
            self.set_transparent_background(true).await?;
        }
        let captured = self.page.execute(builder.build()).await;
        if spec.omit_background {
            if let Err(e) = self.set_transparent_background(false).await {
                tracing::debug!("Failed to reset background override: {}", e);
            }
        }

        let resp = captured.map_err(|e| self.err(e))?;
        let data_b64: &str = resp.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(data_b64.as_bytes())
            .map_err(|e| EngineError::Protocol(format!("base64 decode failed: {}", e)))
    }

    async fn close(self: Box<Self>) -> EngineResult<()> {
        let mut this = self;
        // Disposing the context closes the page along with it
        let disposed = this.context.dispose().await;
        if let Err(e) = &disposed {
            tracing::debug!("Failed to dispose browser context: {}", e);
            let _ = this.page.clone().close().await;
        }
        disposed
    }
}
