//! One screenshot rendering pass over an isolated page.
//!
//! Every engine call is raced against the request deadline and the engine
//! liveness signal in [`Steps::race`]; whichever resolves first wins and
//! the others are dropped.

use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use serde_json::json;
use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::engine::{CaptureSpec, Engine, EnginePage, EngineResult, PageOptions};
use crate::error::{EngineError, RenderError};
use crate::models::{CaptureTarget, ImageType, OutputFormat, Rect, ScreenshotRequest, ScreenshotResult};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowance for one request, fixed when the request arrives.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
    timeout_ms: u64,
}

impl Budget {
    pub fn start(timeout_ms: u64) -> Self {
        Self {
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            timeout_ms,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn expired(&self, step: &'static str) -> RenderError {
        RenderError::Timeout {
            step,
            budget_ms: self.timeout_ms,
        }
    }
}

/// Render `req` on a fresh page of `engine`.
///
/// The page is closed on every exit path before the result or error is
/// returned. `selector_timeout` caps how long `wait_for_selector` may wait.
pub async fn render(
    engine: &dyn Engine,
    req: &ScreenshotRequest,
    budget: Budget,
    selector_timeout: Duration,
) -> Result<ScreenshotResult, RenderError> {
    let mut steps = Steps {
        budget,
        alive: engine.liveness(),
    };

    let options = PageOptions {
        viewport: req.viewport,
        scale: req.scale,
        extra_http_headers: req.extra_http_headers.clone(),
    };
    let page = steps.step("open_page", engine.open_page(&options)).await?;

    let result = steps.run(page.as_ref(), req, selector_timeout).await;

    match tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Page close failed: {}", e),
        Err(_) => tracing::warn!("Page close timed out"),
    }

    result
}

struct Steps {
    budget: Budget,
    alive: watch::Receiver<bool>,
}

impl Steps {
    /// Race `fut` against the deadline and the engine going away.
    async fn race<T>(
        &mut self,
        step: &'static str,
        fut: impl Future<Output = EngineResult<T>>,
    ) -> Result<EngineResult<T>, RenderError> {
        tracing::debug!(step, "Session step");
        tokio::select! {
            biased;
            res = fut => Ok(res),
            _ = self.alive.wait_for(|alive| !*alive) => Err(RenderError::EngineLost {
                step,
                reason: "engine connection lost".into(),
            }),
            _ = tokio::time::sleep_until(self.budget.deadline) => Err(self.budget.expired(step)),
        }
    }

    async fn step<T>(
        &mut self,
        step: &'static str,
        fut: impl Future<Output = EngineResult<T>>,
    ) -> Result<T, RenderError> {
        let budget_ms = self.budget.timeout_ms;
        self.race(step, fut)
            .await?
            .map_err(|e| RenderError::from_engine(e, step, budget_ms))
    }

    async fn run(
        &mut self,
        page: &dyn EnginePage,
        req: &ScreenshotRequest,
        selector_timeout: Duration,
    ) -> Result<ScreenshotResult, RenderError> {
        self.step("load_html", page.load_html(&req.html)).await?;
        self.step("wait_until", page.wait_until(req.wait_until)).await?;

        if let Some(css) = &req.style_overrides {
            self.step("style_overrides", page.add_style(css)).await?;
        }

        self.run_scripts(page, &req.scripts).await?;

        if let Some(selector) = &req.wait_for_selector {
            self.wait_for_selector(page, selector, selector_timeout)
                .await?;
        }

        let clip = self.resolve_target(page, &req.target).await?;
        let spec = match req.output {
            OutputFormat::Png { omit_background } => CaptureSpec {
                image_type: ImageType::Png,
                quality: None,
                omit_background,
                clip,
            },
            OutputFormat::Jpeg { quality } => CaptureSpec {
                image_type: ImageType::Jpeg,
                quality: Some(quality),
                omit_background: false,
                clip,
            },
        };
        let bytes = self.step("capture", page.capture(&spec)).await?;

        encode_result(bytes, spec.image_type)
    }

    /// Throwing scripts are logged and skipped unless they leave the
    /// document unrenderable.
    async fn run_scripts(
        &mut self,
        page: &dyn EnginePage,
        scripts: &[String],
    ) -> Result<(), RenderError> {
        let budget_ms = self.budget.timeout_ms;
        let mut script_errors = Vec::new();

        for (index, script) in scripts.iter().enumerate() {
            match self.race("scripts", page.evaluate(script)).await? {
                Ok(_) => {}
                Err(EngineError::Script(message)) => {
                    tracing::warn!(index, "User script threw: {}", message);
                    script_errors.push(json!({ "index": index, "error": message }));
                }
                Err(e) => return Err(RenderError::from_engine(e, "scripts", budget_ms)),
            }
        }

        if script_errors.is_empty() {
            return Ok(());
        }
        if self.step("scripts", page.is_renderable()).await? {
            return Ok(());
        }
        Err(RenderError::ScreenshotFailed {
            message: "document is not renderable after script errors".into(),
            data: Some(json!({ "script_errors": script_errors })),
        })
    }

    async fn wait_for_selector(
        &mut self,
        page: &dyn EnginePage,
        selector: &str,
        cap: Duration,
    ) -> Result<(), RenderError> {
        let deadline = self.budget.deadline.min(Instant::now() + cap);

        loop {
            if self
                .step("wait_for_selector", page.query_selector(selector))
                .await?
                .is_some()
            {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(if deadline < self.budget.deadline {
                    RenderError::selector_not_found(selector)
                } else {
                    self.budget.expired("wait_for_selector")
                });
            }
            tokio::time::sleep_until((now + SELECTOR_POLL_INTERVAL).min(deadline)).await;
        }
    }

    /// Clip rectangle for the capture, `None` for the plain viewport.
    async fn resolve_target(
        &mut self,
        page: &dyn EnginePage,
        target: &CaptureTarget,
    ) -> Result<Option<Rect>, RenderError> {
        match target {
            CaptureTarget::Clip(rect) => Ok(Some(*rect)),
            CaptureTarget::Element(selector) => {
                let rect = self
                    .step("selector", page.query_selector(selector))
                    .await?
                    .ok_or_else(|| RenderError::selector_not_found(selector.as_str()))?;
                if rect.width <= 0.0 || rect.height <= 0.0 {
                    return Err(RenderError::ScreenshotFailed {
                        message: format!("element '{}' has an empty bounding box", selector),
                        data: Some(json!({ "selector": selector })),
                    });
                }
                Ok(Some(rect))
            }
            CaptureTarget::FullPage => {
                let (width, height) = self.step("full_page", page.content_size()).await?;
                Ok(Some(Rect {
                    x: 0.0,
                    y: 0.0,
                    width: width.ceil(),
                    height: height.ceil(),
                }))
            }
            CaptureTarget::Viewport => Ok(None),
        }
    }
}

fn encode_result(bytes: Vec<u8>, image_type: ImageType) -> Result<ScreenshotResult, RenderError> {
    let format = match image_type {
        ImageType::Png => ImageFormat::Png,
        ImageType::Jpeg => ImageFormat::Jpeg,
    };
    let (width, height) = ImageReader::with_format(Cursor::new(bytes.as_slice()), format)
        .into_dimensions()
        .map_err(|e| RenderError::screenshot_failed(format!("captured image is unreadable: {}", e)))?;

    Ok(ScreenshotResult {
        image: base64::engine::general_purpose::STANDARD.encode(&bytes),
        image_type,
        width,
        height,
        size_bytes: bytes.len(),
    })
}
