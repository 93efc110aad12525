//! Scripted in-memory engine for tests.

use async_trait::async_trait;
use image::{ImageFormat, RgbImage, RgbaImage};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::{CaptureSpec, Engine, EnginePage, EngineResult, Launcher, PageOptions};
use crate::error::EngineError;
use crate::models::{ImageType, Rect, WaitUntil};

/// Knobs controlling how the fake engine behaves.
#[derive(Clone)]
pub struct FakeBehavior {
    /// Elements present once the document is loaded
    pub elements: HashMap<String, Rect>,
    /// Elements that show up some time after load
    pub late_elements: Vec<(String, Rect, Duration)>,
    pub content_size: (f64, f64),
    /// Time `wait_until` takes to resolve
    pub load_delay: Duration,
    /// Number of launches that fail before one succeeds
    pub fail_launches: usize,
    /// Number of `load_html` calls that kill the engine process
    pub crash_on_load: usize,
    /// Time `open_page` takes after its context is allocated
    pub open_delay: Duration,
    /// `capture` fails with a protocol error
    pub fail_capture: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            elements: HashMap::new(),
            late_elements: Vec::new(),
            content_size: (1280.0, 2000.0),
            load_delay: Duration::ZERO,
            fail_launches: 0,
            crash_on_load: 0,
            open_delay: Duration::ZERO,
            fail_capture: false,
        }
    }
}

impl FakeBehavior {
    pub fn with_element(mut self, selector: &str, rect: Rect) -> Self {
        self.elements.insert(selector.to_string(), rect);
        self
    }
}

struct Shared {
    behavior: Mutex<FakeBehavior>,
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    ops: Mutex<Vec<String>>,
    captures: Mutex<Vec<CaptureSpec>>,
    current: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

impl Shared {
    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }
}

/// Counts a page allocation as released if `open_page` is abandoned
/// before handing the page out.
struct PendingPage {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for PendingPage {
    fn drop(&mut self) {
        if self.armed {
            self.shared.pages_closed.fetch_add(1, Ordering::SeqCst);
            self.shared.record("release_abandoned");
        }
    }
}

pub struct FakeLauncher {
    shared: Arc<Shared>,
}

impl FakeLauncher {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                behavior: Mutex::new(behavior),
                launches: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                pages_opened: AtomicUsize::new(0),
                pages_closed: AtomicUsize::new(0),
                ops: Mutex::new(Vec::new()),
                captures: Mutex::new(Vec::new()),
                current: Mutex::new(None),
            }),
        })
    }

    /// Successful and failed launch attempts.
    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.shared.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.shared.pages_closed.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<String> {
        self.shared.ops.lock().unwrap().clone()
    }

    pub fn captures(&self) -> Vec<CaptureSpec> {
        self.shared.captures.lock().unwrap().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeBehavior)) {
        f(&mut self.shared.behavior.lock().unwrap());
    }

    /// Simulate the engine process dying.
    pub fn kill_current(&self) {
        if let Some(tx) = self.shared.current.lock().unwrap().as_ref() {
            let _ = tx.send(false);
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> EngineResult<Arc<dyn Engine>> {
        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        {
            let mut behavior = self.shared.behavior.lock().unwrap();
            if behavior.fail_launches > 0 {
                behavior.fail_launches -= 1;
                return Err(EngineError::Launch("fake launch failure".into()));
            }
        }
        let (tx, rx) = watch::channel(true);
        let tx = Arc::new(tx);
        *self.shared.current.lock().unwrap() = Some(tx.clone());
        Ok(Arc::new(FakeEngine {
            shared: self.shared.clone(),
            alive_tx: tx,
            alive_rx: rx,
        }))
    }
}

struct FakeEngine {
    shared: Arc<Shared>,
    alive_tx: Arc<watch::Sender<bool>>,
    alive_rx: watch::Receiver<bool>,
}

#[async_trait]
impl Engine for FakeEngine {
    async fn open_page(&self, options: &PageOptions) -> EngineResult<Box<dyn EnginePage>> {
        if !*self.alive_rx.borrow() {
            return Err(EngineError::Disconnected("fake engine is dead".into()));
        }
        self.shared.pages_opened.fetch_add(1, Ordering::SeqCst);
        self.shared.record("open_page");
        let mut pending = PendingPage {
            shared: self.shared.clone(),
            armed: true,
        };
        let delay = self.shared.behavior.lock().unwrap().open_delay;
        tokio::time::sleep(delay).await;
        pending.armed = false;

        Ok(Box::new(FakePage {
            shared: self.shared.clone(),
            alive_tx: self.alive_tx.clone(),
            alive_rx: self.alive_rx.clone(),
            options: options.clone(),
            doc: Mutex::new(Document::default()),
        }))
    }

    async fn version(&self) -> EngineResult<String> {
        if *self.alive_rx.borrow() {
            Ok("FakeChrome/1.0".into())
        } else {
            Err(EngineError::Disconnected("fake engine is dead".into()))
        }
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.alive_rx.clone()
    }

    async fn shutdown(&self) -> EngineResult<()> {
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
        let _ = self.alive_tx.send(false);
        Ok(())
    }
}

#[derive(Default)]
struct Document {
    loaded_at: Option<tokio::time::Instant>,
    renderable: bool,
    extra: HashMap<String, Rect>,
}

struct FakePage {
    shared: Arc<Shared>,
    alive_tx: Arc<watch::Sender<bool>>,
    alive_rx: watch::Receiver<bool>,
    options: PageOptions,
    doc: Mutex<Document>,
}

impl FakePage {
    fn check_alive(&self) -> EngineResult<()> {
        if *self.alive_rx.borrow() {
            Ok(())
        } else {
            Err(EngineError::Disconnected("fake engine is dead".into()))
        }
    }

    fn find(&self, selector: &str) -> Option<Rect> {
        let doc = self.doc.lock().unwrap();
        if let Some(rect) = doc.extra.get(selector) {
            return Some(*rect);
        }
        let behavior = self.shared.behavior.lock().unwrap();
        if let Some(rect) = behavior.elements.get(selector) {
            return Some(*rect);
        }
        let loaded_at = doc.loaded_at?;
        behavior
            .late_elements
            .iter()
            .find(|(sel, _, after)| sel == selector && loaded_at.elapsed() >= *after)
            .map(|(_, rect, _)| *rect)
    }
}

#[async_trait]
impl EnginePage for FakePage {
    async fn load_html(&self, _html: &str) -> EngineResult<()> {
        self.check_alive()?;
        self.shared.record("load_html");
        let crash = {
            let mut behavior = self.shared.behavior.lock().unwrap();
            if behavior.crash_on_load > 0 {
                behavior.crash_on_load -= 1;
                true
            } else {
                false
            }
        };
        if crash {
            let _ = self.alive_tx.send(false);
            return Err(EngineError::Disconnected("fake engine crashed".into()));
        }
        let mut doc = self.doc.lock().unwrap();
        doc.loaded_at = Some(tokio::time::Instant::now());
        doc.renderable = true;
        Ok(())
    }

    async fn wait_until(&self, condition: WaitUntil) -> EngineResult<()> {
        self.check_alive()?;
        self.shared.record(format!("wait_until:{condition}"));
        let delay = self.shared.behavior.lock().unwrap().load_delay;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn add_style(&self, _css: &str) -> EngineResult<()> {
        self.check_alive()?;
        self.shared.record("add_style");
        Ok(())
    }

    /// `throw` anywhere fails the script; `document.open()` leaves the
    /// document unrenderable; `add:<selector>` creates an element.
    async fn evaluate(&self, script: &str) -> EngineResult<Value> {
        self.check_alive()?;
        self.shared.record(format!("evaluate:{script}"));
        if script.contains("document.open()") {
            self.doc.lock().unwrap().renderable = false;
        }
        if let Some(selector) = script.strip_prefix("add:") {
            self.doc.lock().unwrap().extra.insert(
                selector.to_string(),
                Rect {
                    x: 0.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                },
            );
        }
        if script.contains("throw") {
            return Err(EngineError::Script(format!("Error: thrown by '{script}'")));
        }
        Ok(Value::Null)
    }

    async fn query_selector(&self, selector: &str) -> EngineResult<Option<Rect>> {
        self.check_alive()?;
        self.shared.record(format!("query_selector:{selector}"));
        Ok(self.find(selector))
    }

    async fn is_renderable(&self) -> EngineResult<bool> {
        self.check_alive()?;
        Ok(self.doc.lock().unwrap().renderable)
    }

    async fn content_size(&self) -> EngineResult<(f64, f64)> {
        self.check_alive()?;
        let behavior = self.shared.behavior.lock().unwrap();
        let (w, h) = behavior.content_size;
        Ok((w.max(self.options.viewport.width as f64), h))
    }

    async fn capture(&self, spec: &CaptureSpec) -> EngineResult<Vec<u8>> {
        self.check_alive()?;
        self.shared.record("capture");
        self.shared.captures.lock().unwrap().push(spec.clone());
        if self.shared.behavior.lock().unwrap().fail_capture {
            return Err(EngineError::Protocol("fake capture failure".into()));
        }

        let (css_w, css_h) = match spec.clip {
            Some(rect) => (rect.width, rect.height),
            None => (
                self.options.viewport.width as f64,
                self.options.viewport.height as f64,
            ),
        };
        let width = (css_w * self.options.scale).ceil().max(1.0) as u32;
        let height = (css_h * self.options.scale).ceil().max(1.0) as u32;
        encode_blank(spec.image_type, width, height, spec.quality)
    }

    async fn close(self: Box<Self>) -> EngineResult<()> {
        self.shared.pages_closed.fetch_add(1, Ordering::SeqCst);
        self.shared.record("close");
        Ok(())
    }
}

fn encode_blank(
    image_type: ImageType,
    width: u32,
    height: u32,
    quality: Option<u8>,
) -> EngineResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let result = match image_type {
        ImageType::Png => {
            RgbaImage::new(width, height).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        }
        ImageType::Jpeg => {
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut bytes,
                quality.unwrap_or(80),
            );
            encoder.encode_image(&RgbImage::new(width, height))
        }
    };
    result.map_err(|e| EngineError::Protocol(format!("fake encode failed: {e}")))?;
    Ok(bytes)
}
