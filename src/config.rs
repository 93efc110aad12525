//! Runtime configuration, read once from flags and environment variables.

use clap::{Args, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::models::{ImageType, Viewport, WaitUntil};

/// Rendering engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrowserType {
    Chromium,
    Firefox,
    Webkit,
}

/// Settings consumed by the engine launcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub default_viewport: Viewport,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::Chromium,
            headless: true,
            chrome_path: None,
            default_viewport: Viewport::default(),
        }
    }
}

/// Defaults applied by the validator and limits used by sessions.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub viewport: Viewport,
    pub image_type: ImageType,
    pub quality: u8,
    pub wait_until: WaitUntil,
    pub timeout_ms: u64,
    /// Cap on a single `wait_for_selector` wait
    pub selector_timeout_ms: u64,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            image_type: ImageType::Png,
            quality: 80,
            wait_until: WaitUntil::NetworkIdle,
            timeout_ms: 30_000,
            selector_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageTypeArg {
    Png,
    Jpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitUntilArg {
    Load,
    Domcontentloaded,
    Networkidle,
}

/// Engine and request-default options shared by every subcommand that renders.
#[derive(Debug, Clone, Args)]
pub struct RenderOptions {
    /// Rendering engine family
    #[arg(long, env = "BROWSER_TYPE", value_enum, default_value = "chromium")]
    pub browser_type: BrowserType,

    /// Run the browser headless
    #[arg(long, env = "HEADLESS", default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    /// Chrome/Chromium executable (auto-detected when unset)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Default viewport width
    #[arg(long, env = "VIEWPORT_WIDTH", default_value_t = 1280,
          value_parser = clap::value_parser!(u32).range(1..=7680))]
    pub viewport_width: u32,

    /// Default viewport height
    #[arg(long, env = "VIEWPORT_HEIGHT", default_value_t = 720,
          value_parser = clap::value_parser!(u32).range(1..=4320))]
    pub viewport_height: u32,

    /// Default output format
    #[arg(long, env = "DEFAULT_IMAGE_TYPE", value_enum, default_value = "png")]
    pub default_image_type: ImageTypeArg,

    /// Default JPEG quality (1-100)
    #[arg(long, env = "DEFAULT_IMAGE_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    pub default_image_quality: u8,

    /// Default completion signal
    #[arg(long, env = "DEFAULT_WAIT_UNTIL", value_enum, default_value = "networkidle")]
    pub default_wait_until: WaitUntilArg,

    /// Default per-request timeout (also used when a request asks for 0)
    #[arg(long, env = "DEFAULT_TIMEOUT_MS", default_value_t = 30_000,
          value_parser = clap::value_parser!(u64).range(1..=120_000))]
    pub default_timeout_ms: u64,

    /// Upper bound for a single wait_for_selector wait
    #[arg(long, env = "DEFAULT_WAIT_FOR_SELECTOR_TIMEOUT", default_value_t = 10_000)]
    pub selector_timeout_ms: u64,

    /// Maximum number of concurrent rendering sessions
    #[arg(long, env = "MAX_CONCURRENT_SCREENSHOTS", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_concurrent: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RenderOptions {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            browser_type: self.browser_type,
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            default_viewport: self.viewport(),
        }
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            viewport: self.viewport(),
            image_type: match self.default_image_type {
                ImageTypeArg::Png => ImageType::Png,
                ImageTypeArg::Jpeg => ImageType::Jpeg,
            },
            quality: self.default_image_quality,
            wait_until: match self.default_wait_until {
                WaitUntilArg::Load => WaitUntil::Load,
                WaitUntilArg::Domcontentloaded => WaitUntil::DomContentLoaded,
                WaitUntilArg::Networkidle => WaitUntil::NetworkIdle,
            },
            timeout_ms: self.default_timeout_ms,
            selector_timeout_ms: self.selector_timeout_ms,
        }
    }

    /// Filter directive for tracing-subscriber.
    pub fn log_filter(&self) -> String {
        format!(
            "screenshot_gateway={},chromiumoxide=warn",
            self.log_level.to_lowercase()
        )
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }
}

/// `serve` options.
#[derive(Debug, Clone, Args)]
pub struct ServeOptions {
    /// Listen address
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Launch the browser on first request instead of at startup
    #[arg(long)]
    pub no_prewarm: bool,

    #[command(flatten)]
    pub render: RenderOptions,
}

impl ServeOptions {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", addr, e))
    }
}
