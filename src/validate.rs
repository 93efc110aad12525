//! Validation of raw `screenshot` params into a [`ScreenshotRequest`].
//!
//! Checks run in passes: presence and type of every field, then numeric
//! ranges, then enum membership, then nested objects (`viewport`, `clip`).
//! The first violation stops validation and names the offending field.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::RequestDefaults;
use crate::models::{
    CaptureTarget, Encoding, ImageType, OutputFormat, Rect, ScreenshotRequest, Viewport, WaitUntil,
};

pub const MAX_TIMEOUT_MS: u64 = 120_000;
pub const MAX_VIEWPORT_WIDTH: u64 = 7680;
pub const MAX_VIEWPORT_HEIGHT: u64 = 4320;
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 4.0;

/// First constraint violated by the params.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// Dotted path of the field, e.g. `viewport.width`
    pub field: String,
    pub reason: String,
}

impl ValidationFailure {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn to_data(&self) -> Value {
        json!({ "field": self.field, "reason": self.reason })
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationFailure {}

type Check<T> = Result<T, ValidationFailure>;

/// Field values after the type pass, before ranges and enums are checked.
struct Typed<'a> {
    html: &'a str,
    selector: Option<&'a str>,
    clip: Option<&'a Map<String, Value>>,
    full_page: bool,
    viewport: Option<&'a Map<String, Value>>,
    wait_until: Option<&'a str>,
    wait_for_selector: Option<&'a str>,
    timeout_ms: Option<u64>,
    extra_http_headers: BTreeMap<String, String>,
    style_overrides: Option<&'a str>,
    scripts: Vec<String>,
    image_type: Option<&'a str>,
    quality: Option<u64>,
    scale: Option<f64>,
    omit_background: bool,
    encoding: Option<&'a str>,
}

/// Validate raw params. `None` params are treated as an empty object.
pub fn validate(
    params: Option<&Value>,
    defaults: &RequestDefaults,
) -> Result<ScreenshotRequest, ValidationFailure> {
    let empty = Map::new();
    let obj = match params {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ValidationFailure::new("params", "must be an object")),
    };

    let typed = type_pass(obj)?;
    range_pass(&typed)?;
    let (wait_until, image_type, encoding) = enum_pass(&typed, defaults)?;
    let viewport = match typed.viewport {
        Some(map) => viewport_from(map, defaults.viewport)?,
        None => defaults.viewport,
    };
    let clip = typed.clip.map(clip_from).transpose()?;

    let target = if let Some(rect) = clip {
        CaptureTarget::Clip(rect)
    } else if let Some(selector) = typed.selector {
        CaptureTarget::Element(selector.to_string())
    } else if typed.full_page {
        CaptureTarget::FullPage
    } else {
        CaptureTarget::Viewport
    };

    let output = match image_type {
        ImageType::Png => OutputFormat::Png {
            omit_background: typed.omit_background,
        },
        ImageType::Jpeg => OutputFormat::Jpeg {
            // range_pass bounds this to 1..=100
            quality: typed.quality.map_or(defaults.quality, |q| q as u8),
        },
    };

    let timeout_ms = match typed.timeout_ms {
        None | Some(0) => defaults.timeout_ms,
        Some(ms) => ms,
    };

    Ok(ScreenshotRequest {
        html: typed.html.to_string(),
        target,
        viewport,
        wait_until,
        wait_for_selector: typed.wait_for_selector.map(str::to_string),
        timeout_ms,
        extra_http_headers: typed.extra_http_headers,
        style_overrides: typed.style_overrides.map(str::to_string),
        scripts: typed.scripts,
        output,
        scale: typed.scale.unwrap_or(1.0),
        encoding,
    })
}

fn type_pass(obj: &Map<String, Value>) -> Check<Typed<'_>> {
    let html = match field(obj, "html") {
        None => return Err(ValidationFailure::new("html", "field required")),
        Some(v) => v
            .as_str()
            .ok_or_else(|| ValidationFailure::new("html", "must be a string"))?,
    };
    if html.trim().is_empty() {
        return Err(ValidationFailure::new("html", "must not be empty"));
    }

    Ok(Typed {
        html,
        selector: opt_selector(obj, "selector")?,
        clip: opt_object(obj, "clip")?,
        full_page: opt_bool(obj, "full_page")?.unwrap_or(false),
        viewport: opt_object(obj, "viewport")?,
        wait_until: opt_str(obj, "wait_until")?,
        wait_for_selector: opt_selector(obj, "wait_for_selector")?,
        timeout_ms: opt_uint(obj, "timeout_ms")?,
        extra_http_headers: opt_headers(obj)?,
        style_overrides: opt_str(obj, "style_overrides")?,
        scripts: opt_scripts(obj)?,
        image_type: opt_str(obj, "image_type")?,
        quality: opt_uint(obj, "quality")?,
        scale: opt_number(obj, "scale")?,
        omit_background: opt_bool(obj, "omit_background")?.unwrap_or(false),
        encoding: opt_str(obj, "encoding")?,
    })
}

fn range_pass(typed: &Typed<'_>) -> Check<()> {
    if let Some(ms) = typed.timeout_ms {
        if ms > MAX_TIMEOUT_MS {
            return Err(ValidationFailure::new(
                "timeout_ms",
                format!("must be between 0 and {MAX_TIMEOUT_MS}"),
            ));
        }
    }
    if let Some(q) = typed.quality {
        if !(1..=100).contains(&q) {
            return Err(ValidationFailure::new("quality", "must be between 1 and 100"));
        }
    }
    if let Some(scale) = typed.scale {
        if !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
            return Err(ValidationFailure::new(
                "scale",
                format!("must be between {MIN_SCALE} and {MAX_SCALE}"),
            ));
        }
    }
    Ok(())
}

fn enum_pass(
    typed: &Typed<'_>,
    defaults: &RequestDefaults,
) -> Check<(WaitUntil, ImageType, Encoding)> {
    let wait_until = match typed.wait_until {
        None => defaults.wait_until,
        Some(v) => WaitUntil::parse(v).ok_or_else(|| {
            ValidationFailure::new(
                "wait_until",
                "must be one of 'load', 'domcontentloaded', 'networkidle'",
            )
        })?,
    };
    let image_type = match typed.image_type {
        None => defaults.image_type,
        Some(v) => ImageType::parse(v).ok_or_else(|| {
            ValidationFailure::new("image_type", "must be one of 'png', 'jpeg'")
        })?,
    };
    let encoding = match typed.encoding {
        None | Some("base64") => Encoding::Base64,
        Some("binary") => Encoding::Binary,
        Some(_) => {
            return Err(ValidationFailure::new(
                "encoding",
                "must be one of 'base64', 'binary'",
            ))
        }
    };
    Ok((wait_until, image_type, encoding))
}

fn viewport_from(map: &Map<String, Value>, defaults: Viewport) -> Check<Viewport> {
    let width = viewport_dim(map, "width", MAX_VIEWPORT_WIDTH)?.unwrap_or(defaults.width);
    let height = viewport_dim(map, "height", MAX_VIEWPORT_HEIGHT)?.unwrap_or(defaults.height);
    Ok(Viewport { width, height })
}

fn viewport_dim(map: &Map<String, Value>, key: &str, max: u64) -> Check<Option<u32>> {
    let path = format!("viewport.{key}");
    let Some(value) = field(map, key) else {
        return Ok(None);
    };
    let reason = format!("must be an integer between 1 and {max}");
    // Negative and fractional values fail as_u64
    let n = value
        .as_u64()
        .ok_or_else(|| ValidationFailure::new(&path, &reason))?;
    if n == 0 || n > max {
        return Err(ValidationFailure::new(&path, &reason));
    }
    Ok(Some(n as u32))
}

fn clip_from(map: &Map<String, Value>) -> Check<Rect> {
    let coord = |key: &str, strictly_positive: bool| -> Check<f64> {
        let path = format!("clip.{key}");
        let value = field(map, key).ok_or_else(|| ValidationFailure::new(&path, "field required"))?;
        let n = value
            .as_f64()
            .ok_or_else(|| ValidationFailure::new(&path, "must be a number"))?;
        if strictly_positive && n <= 0.0 {
            return Err(ValidationFailure::new(&path, "must be greater than 0"));
        }
        if n < 0.0 {
            return Err(ValidationFailure::new(&path, "must be greater than or equal to 0"));
        }
        Ok(n)
    };
    Ok(Rect {
        x: coord("x", false)?,
        y: coord("y", false)?,
        width: coord("width", true)?,
        height: coord("height", true)?,
    })
}

/// Field lookup that treats an explicit `null` as absent.
fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn opt_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Check<Option<&'a str>> {
    match field(obj, key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| ValidationFailure::new(key, "must be a string")),
    }
}

fn opt_selector<'a>(obj: &'a Map<String, Value>, key: &str) -> Check<Option<&'a str>> {
    match opt_str(obj, key)? {
        Some(s) if s.trim().is_empty() => Err(ValidationFailure::new(key, "must not be empty")),
        other => Ok(other),
    }
}

fn opt_bool(obj: &Map<String, Value>, key: &str) -> Check<Option<bool>> {
    match field(obj, key) {
        None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| ValidationFailure::new(key, "must be a boolean")),
    }
}

fn opt_uint(obj: &Map<String, Value>, key: &str) -> Check<Option<u64>> {
    match field(obj, key) {
        None => Ok(None),
        Some(v) if v.is_i64() && v.as_i64().is_some_and(|n| n < 0) => Err(
            ValidationFailure::new(key, "must be greater than or equal to 0"),
        ),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ValidationFailure::new(key, "must be an integer")),
    }
}

fn opt_number(obj: &Map<String, Value>, key: &str) -> Check<Option<f64>> {
    match field(obj, key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| ValidationFailure::new(key, "must be a number")),
    }
}

fn opt_object<'a>(obj: &'a Map<String, Value>, key: &str) -> Check<Option<&'a Map<String, Value>>> {
    match field(obj, key) {
        None => Ok(None),
        Some(v) => v
            .as_object()
            .map(Some)
            .ok_or_else(|| ValidationFailure::new(key, "must be an object")),
    }
}

fn opt_headers(obj: &Map<String, Value>) -> Check<BTreeMap<String, String>> {
    let Some(map) = opt_object(obj, "extra_http_headers")? else {
        return Ok(BTreeMap::new());
    };
    map.iter()
        .map(|(name, value)| {
            value
                .as_str()
                .map(|v| (name.clone(), v.to_string()))
                .ok_or_else(|| {
                    ValidationFailure::new(format!("extra_http_headers.{name}"), "must be a string")
                })
        })
        .collect()
}

fn opt_scripts(obj: &Map<String, Value>) -> Check<Vec<String>> {
    let Some(value) = field(obj, "scripts") else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ValidationFailure::new("scripts", "must be an array of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ValidationFailure::new(format!("scripts.{i}"), "must be a string"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(params: Value) -> Result<ScreenshotRequest, ValidationFailure> {
        validate(Some(&params), &RequestDefaults::default())
    }

    #[test]
    fn minimal_request_gets_defaults() {
        let req = run(json!({"html": "<h1>Hi</h1>"})).unwrap();
        assert_eq!(req.viewport, Viewport { width: 1280, height: 720 });
        assert_eq!(req.wait_until, WaitUntil::NetworkIdle);
        assert_eq!(req.timeout_ms, 30_000);
        assert_eq!(req.target, CaptureTarget::Viewport);
        assert_eq!(req.output, OutputFormat::Png { omit_background: false });
        assert_eq!(req.scale, 1.0);
        assert!(req.scripts.is_empty());
    }

    #[test]
    fn missing_or_blank_html_is_rejected() {
        assert_eq!(run(json!({})).unwrap_err().field, "html");
        assert_eq!(run(json!({"html": "   "})).unwrap_err().field, "html");
        assert_eq!(validate(None, &RequestDefaults::default()).unwrap_err().field, "html");
    }

    #[test]
    fn negative_viewport_width_names_nested_field() {
        let err = run(json!({"html": "x", "viewport": {"width": -1}})).unwrap_err();
        assert_eq!(err.field, "viewport.width");
        assert_eq!(err.to_data()["field"], "viewport.width");
    }

    #[test]
    fn partial_viewport_keeps_default_for_missing_dimension() {
        let req = run(json!({"html": "x", "viewport": {"width": 640}})).unwrap();
        assert_eq!(req.viewport, Viewport { width: 640, height: 720 });
    }

    #[test]
    fn viewport_upper_bound_is_enforced() {
        let err = run(json!({"html": "x", "viewport": {"height": 5000}})).unwrap_err();
        assert_eq!(err.field, "viewport.height");
    }

    #[test]
    fn clip_wins_over_selector() {
        let req = run(json!({
            "html": "x",
            "selector": "h1",
            "full_page": true,
            "clip": {"x": 0, "y": 10, "width": 50, "height": 20}
        }))
        .unwrap();
        assert_eq!(
            req.target,
            CaptureTarget::Clip(Rect { x: 0.0, y: 10.0, width: 50.0, height: 20.0 })
        );
    }

    #[test]
    fn selector_wins_over_full_page() {
        let req = run(json!({"html": "x", "selector": "h1", "full_page": true})).unwrap();
        assert_eq!(req.target, CaptureTarget::Element("h1".into()));
        let req = run(json!({"html": "x", "full_page": true})).unwrap();
        assert_eq!(req.target, CaptureTarget::FullPage);
    }

    #[test]
    fn clip_requires_positive_size() {
        let err = run(json!({"html": "x", "clip": {"x": 0, "y": 0, "width": 0, "height": 5}}))
            .unwrap_err();
        assert_eq!(err.field, "clip.width");
        let err = run(json!({"html": "x", "clip": {"x": -1, "y": 0, "width": 1, "height": 5}}))
            .unwrap_err();
        assert_eq!(err.field, "clip.x");
        let err = run(json!({"html": "x", "clip": {"x": 0, "width": 1, "height": 5}})).unwrap_err();
        assert_eq!(err.field, "clip.y");
    }

    #[test]
    fn timeout_zero_uses_default_and_upper_bound_is_checked() {
        let req = run(json!({"html": "x", "timeout_ms": 0})).unwrap();
        assert_eq!(req.timeout_ms, 30_000);
        let err = run(json!({"html": "x", "timeout_ms": 120_001})).unwrap_err();
        assert_eq!(err.field, "timeout_ms");
        let err = run(json!({"html": "x", "timeout_ms": -5})).unwrap_err();
        assert_eq!(err.field, "timeout_ms");
    }

    #[test]
    fn scale_and_quality_ranges() {
        assert_eq!(run(json!({"html": "x", "scale": 0.05})).unwrap_err().field, "scale");
        assert_eq!(run(json!({"html": "x", "scale": 4.5})).unwrap_err().field, "scale");
        assert_eq!(run(json!({"html": "x", "quality": 0})).unwrap_err().field, "quality");
        assert_eq!(run(json!({"html": "x", "quality": 101})).unwrap_err().field, "quality");
    }

    #[test]
    fn type_errors_are_reported_before_range_errors() {
        // scale is out of range but wait_until has the wrong type
        let err = run(json!({"html": "x", "scale": 9.0, "wait_until": 3})).unwrap_err();
        assert_eq!(err.field, "wait_until");
        assert_eq!(err.reason, "must be a string");
    }

    #[test]
    fn range_errors_are_reported_before_enum_errors() {
        let err = run(json!({"html": "x", "image_type": "gif", "quality": 500})).unwrap_err();
        assert_eq!(err.field, "quality");
    }

    #[test]
    fn enum_membership() {
        assert_eq!(run(json!({"html": "x", "wait_until": "idle"})).unwrap_err().field, "wait_until");
        assert_eq!(run(json!({"html": "x", "image_type": "gif"})).unwrap_err().field, "image_type");
        assert_eq!(run(json!({"html": "x", "encoding": "hex"})).unwrap_err().field, "encoding");
    }

    #[test]
    fn jpeg_carries_quality_and_png_ignores_it() {
        let req = run(json!({"html": "x", "image_type": "jpeg", "quality": 42, "omit_background": true}))
            .unwrap();
        assert_eq!(req.output, OutputFormat::Jpeg { quality: 42 });
        let req = run(json!({"html": "x", "quality": 42, "omit_background": true})).unwrap();
        assert_eq!(req.output, OutputFormat::Png { omit_background: true });
    }

    #[test]
    fn headers_and_scripts_must_be_strings() {
        let err = run(json!({"html": "x", "extra_http_headers": {"X-A": 1}})).unwrap_err();
        assert_eq!(err.field, "extra_http_headers.X-A");
        let err = run(json!({"html": "x", "scripts": ["ok()", 5]})).unwrap_err();
        assert_eq!(err.field, "scripts.1");
        let req = run(json!({
            "html": "x",
            "extra_http_headers": {"X-A": "1"},
            "scripts": ["a()", "b()"]
        }))
        .unwrap();
        assert_eq!(req.extra_http_headers.get("X-A").map(String::as_str), Some("1"));
        assert_eq!(req.scripts, vec!["a()".to_string(), "b()".to_string()]);
    }

    #[test]
    fn null_optional_fields_are_treated_as_absent() {
        let req = run(json!({"html": "x", "selector": null, "clip": null, "viewport": null})).unwrap();
        assert_eq!(req.target, CaptureTarget::Viewport);
    }

    #[test]
    fn non_object_params_are_rejected() {
        let err = run(json!(["html"])).unwrap_err();
        assert_eq!(err.field, "params");
    }
}
