//! Data models for screenshot requests and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Browser viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Pixel rectangle in page coordinates (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Png,
    Jpeg,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "png" => Some(Self::Png),
            "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion signal awaited after the document is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "load" => Some(Self::Load),
            "domcontentloaded" => Some(Self::DomContentLoaded),
            "networkidle" => Some(Self::NetworkIdle),
            _ => None,
        }
    }
}

impl fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding label requested by the caller. JSON responses always carry base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Base64,
    Binary,
}

/// What region of the page gets captured.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    /// Explicit rectangle; wins over everything else
    Clip(Rect),
    /// Bounding box of the first element matching the selector
    Element(String),
    /// Entire scrollable document
    FullPage,
    /// Current viewport
    Viewport,
}

/// Format-specific capture options. Quality only exists for JPEG and the
/// transparent background only for PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png { omit_background: bool },
    Jpeg { quality: u8 },
}

impl OutputFormat {
    pub fn image_type(&self) -> ImageType {
        match self {
            Self::Png { .. } => ImageType::Png,
            Self::Jpeg { .. } => ImageType::Jpeg,
        }
    }
}

/// Validated `screenshot` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotRequest {
    pub html: String,
    pub target: CaptureTarget,
    pub viewport: Viewport,
    pub wait_until: WaitUntil,
    pub wait_for_selector: Option<String>,
    /// Effective budget; a requested 0 has already been replaced by the default
    pub timeout_ms: u64,
    pub extra_http_headers: BTreeMap<String, String>,
    pub style_overrides: Option<String>,
    pub scripts: Vec<String>,
    pub output: OutputFormat,
    /// Device pixel ratio multiplier
    pub scale: f64,
    pub encoding: Encoding,
}

impl ScreenshotRequest {
    /// Minimal request with default rendering options.
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            target: CaptureTarget::Viewport,
            viewport: Viewport::default(),
            wait_until: WaitUntil::NetworkIdle,
            wait_for_selector: None,
            timeout_ms: 30_000,
            extra_http_headers: BTreeMap::new(),
            style_overrides: None,
            scripts: Vec::new(),
            output: OutputFormat::Png {
                omit_background: false,
            },
            scale: 1.0,
            encoding: Encoding::Base64,
        }
    }

    pub fn image_type(&self) -> ImageType {
        self.output.image_type()
    }
}

/// Returned in the JSON-RPC `result` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotResult {
    /// Base64-encoded image bytes
    pub image: String,
    pub image_type: ImageType,
    /// Actual pixel width of the captured raster
    pub width: u32,
    /// Actual pixel height of the captured raster
    pub height: u32,
    /// Size of the raw image before base64 encoding
    pub size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_serializes_with_wire_field_names() {
        let result = ScreenshotResult {
            image: "AAAA".into(),
            image_type: ImageType::Jpeg,
            width: 10,
            height: 20,
            size_bytes: 3,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "image": "AAAA",
                "image_type": "jpeg",
                "width": 10,
                "height": 20,
                "size_bytes": 3
            })
        );
    }

    #[test]
    fn wait_until_names_round_trip_through_parse() {
        for wait in [WaitUntil::Load, WaitUntil::DomContentLoaded, WaitUntil::NetworkIdle] {
            assert_eq!(WaitUntil::parse(wait.as_str()), Some(wait));
        }
        assert_eq!(WaitUntil::parse("idle"), None);
    }

    #[test]
    fn output_format_reports_image_type() {
        assert_eq!(
            OutputFormat::Jpeg { quality: 50 }.image_type(),
            ImageType::Jpeg
        );
        assert_eq!(
            OutputFormat::Png {
                omit_background: true
            }
            .image_type(),
            ImageType::Png
        );
    }
}
