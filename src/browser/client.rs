//! Chrome launcher and engine wrapper.
//!
//! Every page lives in its own browser context (cookies, storage, cache and
//! extra headers are not shared), so concurrent sessions never observe each
//! other's state.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use super::page::{classify, ChromiumPage, ContextGuard};
use crate::config::{BrowserType, EngineConfig};
use crate::engine::{Engine, EnginePage, EngineResult, Launcher, PageOptions};
use crate::error::EngineError;
use crate::validate::MAX_TIMEOUT_MS;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// chromiumoxide's own per-command timeout. Kept above the largest request
/// budget so only the session deadline ever decides a Timeout.
const CDP_REQUEST_TIMEOUT: Duration = Duration::from_millis(MAX_TIMEOUT_MS + 30_000);

static LAUNCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Launches Chrome/Chromium processes.
pub struct ChromiumLauncher {
    config: EngineConfig,
}

impl ChromiumLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Fail early for engine families the CDP backend can't drive.
    pub fn check_supported(browser_type: BrowserType) -> EngineResult<()> {
        match browser_type {
            BrowserType::Chromium => Ok(()),
            other => Err(EngineError::Launch(format!(
                "browser type {:?} is not supported by the CDP backend; use chromium",
                other
            ))),
        }
    }

    fn browser_config(&self, user_data_dir: &Path) -> EngineResult<BrowserConfig> {
        let chrome_path = match &self.config.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome_executable()?,
        };

        let viewport = self.config.default_viewport;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(user_data_dir)
            .viewport(None)
            .request_timeout(CDP_REQUEST_TIMEOUT)
            .no_sandbox()
            .arg(format!("--window-size={},{}", viewport.width, viewport.height))
            // Performance flags
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-breakpad")
            .arg("--disable-component-extensions-with-background-pages")
            .arg("--disable-default-apps")
            .arg("--disable-extensions")
            .arg("--disable-hang-monitor")
            .arg("--disable-ipc-flooding-protection")
            .arg("--disable-popup-blocking")
            .arg("--disable-renderer-backgrounding")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("--no-first-run")
            .arg("--password-store=basic")
            .arg("--font-render-hinting=none");

        if self.config.headless {
            builder = builder.arg("--headless=old");
        } else {
            builder = builder.with_head();
        }

        builder
            .build()
            .map_err(|e| EngineError::Launch(format!("failed to build browser config: {}", e)))
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self) -> EngineResult<Arc<dyn Engine>> {
        Self::check_supported(self.config.browser_type)?;

        // Fresh profile per launch so a crashed process never leaves a locked one behind
        let instance = LAUNCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "screenshot-gateway-{}-{}",
            std::process::id(),
            instance
        ));
        let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|e| EngineError::Launch(format!("failed to create profile dir: {}", e)))?;

        let config = self.browser_config(&user_data_dir)?;
        tracing::info!(
            "Launching Chrome (headless={}, profile={:?})",
            self.config.headless,
            user_data_dir
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        let (alive_tx, alive_rx) = watch::channel(true);
        let alive_tx = Arc::new(alive_tx);
        let handler_alive = alive_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                match event {
                    Ok(()) => {}
                    Err(CdpError::Ws(e)) => {
                        tracing::warn!("CDP websocket error: {}", e);
                        break;
                    }
                    Err(e) => tracing::debug!("CDP handler error: {}", e),
                }
            }
            tracing::info!("CDP connection closed");
            let _ = handler_alive.send(false);
        });

        Ok(Arc::new(ChromiumEngine {
            browser: Arc::new(RwLock::new(browser)),
            alive_tx,
            alive_rx,
            user_data_dir,
        }))
    }
}

/// A running Chrome process.
pub struct ChromiumEngine {
    browser: Arc<RwLock<Browser>>,
    alive_tx: Arc<watch::Sender<bool>>,
    alive_rx: watch::Receiver<bool>,
    user_data_dir: PathBuf,
}

#[async_trait]
impl Engine for ChromiumEngine {
    async fn open_page(&self, options: &PageOptions) -> EngineResult<Box<dyn EnginePage>> {
        let context_id = self
            .browser
            .read()
            .await
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| classify(e, &self.alive_rx))?;
        // From here on a dropped future still disposes the context
        let mut context =
            ContextGuard::new(context_id.clone(), self.browser.clone(), self.alive_rx.clone());

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
            .map_err(|e| EngineError::Protocol(format!("failed to build target params: {}", e)))?;

        let created = self.browser.read().await.new_page(target).await;
        let page = match created {
            Ok(page) => page,
            Err(e) => {
                let _ = context.dispose().await;
                return Err(classify(e, &self.alive_rx));
            }
        };

        let page = Box::new(ChromiumPage::new(page, context, self.alive_rx.clone()));
        if let Err(e) = page.configure(options).await {
            let _ = page.close().await;
            return Err(e);
        }
        Ok(page)
    }

    async fn version(&self) -> EngineResult<String> {
        let browser = self.browser.read().await;
        let version = browser
            .version()
            .await
            .map_err(|e| classify(e, &self.alive_rx))?;
        Ok(version.product)
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.alive_rx.clone()
    }

    async fn shutdown(&self) -> EngineResult<()> {
        let mut browser = self.browser.write().await;

        match tokio::time::timeout(CLOSE_TIMEOUT, browser.close()).await {
            Ok(Ok(_)) => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, browser.wait()).await;
            }
            Ok(Err(e)) => {
                tracing::debug!("Browser close failed ({}), killing process", e);
                let _ = browser.kill().await;
            }
            Err(_) => {
                tracing::warn!("Browser close timed out, killing process");
                let _ = browser.kill().await;
            }
        }

        let _ = self.alive_tx.send(false);
        let _ = tokio::fs::remove_dir_all(&self.user_data_dir).await;
        Ok(())
    }
}

/// Find Chrome executable on the system.
fn find_chrome_executable() -> EngineResult<PathBuf> {
    if let Some(binary) = playwright_headless_shell() {
        tracing::info!("Using chrome-headless-shell at: {:?}", binary);
        return Ok(binary);
    }
    if let Some(binary) = system_chrome() {
        tracing::info!("Found Chrome at: {:?}", binary);
        return Ok(binary);
    }

    Err(EngineError::Launch(
        "Chrome/Chromium not found. Set CHROME_PATH or install one \
         (npx playwright install chromium)."
            .into(),
    ))
}

/// Platform subdirectories of a Playwright `chromium_headless_shell-*`
/// install, preferred one first.
fn headless_shell_subdirs() -> [&'static str; 2] {
    if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            ["chrome-headless-shell-mac-arm64", "chrome-headless-shell-mac-x64"]
        } else {
            ["chrome-headless-shell-mac-x64", "chrome-headless-shell-mac-arm64"]
        }
    } else {
        ["chrome-headless-shell-linux64", "chrome-headless-shell-linux"]
    }
}

/// Newest `chrome-headless-shell` in a Playwright browser cache.
fn playwright_headless_shell() -> Option<PathBuf> {
    let home = dirs::home_dir()?;

    ["Library/Caches/ms-playwright", ".cache/ms-playwright"]
        .iter()
        .filter_map(|cache| std::fs::read_dir(home.join(cache)).ok())
        .find_map(|entries| {
            let mut installs: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with("chromium_headless_shell")
                })
                .map(|e| e.path())
                .collect();
            installs.sort_by(|a, b| b.cmp(a));

            installs.into_iter().find_map(|install| {
                headless_shell_subdirs()
                    .iter()
                    .map(|subdir| install.join(subdir).join("chrome-headless-shell"))
                    .find(|binary| binary.exists())
            })
        })
}

/// A Chrome or Chromium installed in a well-known system location.
fn system_chrome() -> Option<PathBuf> {
    [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|path| path.exists())
}

/// Whether a Chrome binary can be found without explicit configuration.
pub fn chrome_available() -> bool {
    find_chrome_executable().is_ok()
}
