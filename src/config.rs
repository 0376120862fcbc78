//! Configuration types for the image acquisition wizard.
//!
//! Every knob lives in [`WizardConfig`], built via [`WizardConfigBuilder`].
//! The config also carries the injected capabilities (uploader, optional
//! remover, optional observer) so one value fully describes a wizard
//! invocation.

use crate::error::WizardError;
use crate::observer::SharedObserver;
use crate::pipeline::upload::{Remover, Uploader};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Size ceiling for selected files: 20 MiB.
pub const MAX_FILE_BYTES: u64 = 20 * 1024 * 1024;

/// MIME types the selector accepts.
pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Lower bound of the zoom slider.
pub const MIN_ZOOM: f64 = 1.0;

/// Upper bound of the zoom slider.
pub const MAX_ZOOM: f64 = 3.0;

/// JPEG quality used when the caller does not choose one (canvas default 0.92).
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Env var consulted when neither an uploader nor an endpoint is configured.
pub const UPLOAD_URL_ENV: &str = "PROOFCROP_UPLOAD_URL";

/// Configuration for one wizard invocation.
///
/// # Example
/// ```rust
/// use proofcrop::{OutputFormat, WizardConfig};
///
/// let config = WizardConfig::builder()
///     .jpeg_quality(85)
///     .fallback_format(OutputFormat::Png)
///     .upload_endpoint("https://guild.example.com/api/attendance/proof")
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Clone)]
pub struct WizardConfig {
    /// Largest accepted file, in bytes. Default: [`MAX_FILE_BYTES`].
    pub max_file_bytes: u64,

    /// Quality for JPEG output, 1–100. Default: 92.
    pub jpeg_quality: u8,

    /// Keep the source's MIME type for the output when it can be encoded.
    /// Default: true.
    pub preserve_source_format: bool,

    /// Format used when the source type cannot (or should not) be kept.
    /// Default: PNG.
    pub fallback_format: OutputFormat,

    /// Backend endpoint for the built-in HTTP uploader.
    pub upload_endpoint: Option<String>,

    /// Multipart field name the backend expects. Default: `"file"`.
    pub upload_field: String,

    /// Timeout for the built-in HTTP uploader, in seconds. Default: 60.
    pub upload_timeout_secs: u64,

    /// URL of the image already stored for this slot, if any. Removal is
    /// only offered when this is set and a remover is injected.
    pub current_image_url: Option<String>,

    /// Pre-constructed upload collaborator. Takes precedence over
    /// `upload_endpoint`.
    pub uploader: Option<Arc<dyn Uploader>>,

    /// Optional removal collaborator.
    pub remover: Option<Arc<dyn Remover>>,

    /// Receives transitions, geometry changes and user notices.
    pub observer: Option<SharedObserver>,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            preserve_source_format: true,
            fallback_format: OutputFormat::Png,
            upload_endpoint: None,
            upload_field: "file".to_string(),
            upload_timeout_secs: 60,
            current_image_url: None,
            uploader: None,
            remover: None,
            observer: None,
        }
    }
}

impl fmt::Debug for WizardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WizardConfig")
            .field("max_file_bytes", &self.max_file_bytes)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("preserve_source_format", &self.preserve_source_format)
            .field("fallback_format", &self.fallback_format)
            .field("upload_endpoint", &self.upload_endpoint)
            .field("upload_field", &self.upload_field)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("current_image_url", &self.current_image_url)
            .field("uploader", &self.uploader.as_ref().map(|_| "<dyn Uploader>"))
            .field("remover", &self.remover.as_ref().map(|_| "<dyn Remover>"))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn WizardObserver>"))
            .finish()
    }
}

impl WizardConfig {
    /// Create a new builder for `WizardConfig`.
    pub fn builder() -> WizardConfigBuilder {
        WizardConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `mime_type` is on the selector's allow-list.
    pub fn accepts_mime(&self, mime_type: &str) -> bool {
        ACCEPTED_MIME_TYPES.contains(&mime_type)
    }
}

/// Builder for [`WizardConfig`].
#[derive(Debug)]
pub struct WizardConfigBuilder {
    config: WizardConfig,
}

impl WizardConfigBuilder {
    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn preserve_source_format(mut self, v: bool) -> Self {
        self.config.preserve_source_format = v;
        self
    }

    pub fn fallback_format(mut self, format: OutputFormat) -> Self {
        self.config.fallback_format = format;
        self
    }

    pub fn upload_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.upload_endpoint = Some(url.into());
        self
    }

    pub fn upload_field(mut self, name: impl Into<String>) -> Self {
        self.config.upload_field = name.into();
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn current_image_url(mut self, url: impl Into<String>) -> Self {
        self.config.current_image_url = Some(url.into());
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.config.uploader = Some(uploader);
        self
    }

    pub fn remover(mut self, remover: Arc<dyn Remover>) -> Self {
        self.config.remover = Some(remover);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WizardConfig, WizardError> {
        let c = &self.config;
        if c.max_file_bytes == 0 {
            return Err(WizardError::InvalidConfig(
                "max_file_bytes must be > 0".into(),
            ));
        }
        if c.upload_field.trim().is_empty() {
            return Err(WizardError::InvalidConfig(
                "upload_field must not be empty".into(),
            ));
        }
        if let Some(ref url) = c.upload_endpoint {
            if !is_http_url(url) {
                return Err(WizardError::InvalidConfig(format!(
                    "upload endpoint must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(self.config)
    }
}

/// Check if the string looks like an HTTP(S) URL.
pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Aspect-ratio constraint for the crop rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// Unconstrained (default).
    #[default]
    Free,
    /// Width / height fixed at `num / den`.
    Fixed { num: u32, den: u32 },
}

impl AspectRatio {
    pub const SQUARE: Self = Self::Fixed { num: 1, den: 1 };
    pub const WIDESCREEN: Self = Self::Fixed { num: 16, den: 9 };
    pub const STANDARD: Self = Self::Fixed { num: 4, den: 3 };
    pub const CLASSIC: Self = Self::Fixed { num: 3, den: 2 };

    /// The presets offered by the crop stage, in display order.
    pub const PRESETS: [AspectRatio; 5] = [
        Self::Free,
        Self::SQUARE,
        Self::WIDESCREEN,
        Self::STANDARD,
        Self::CLASSIC,
    ];

    /// A fixed ratio, or `None` when either side is zero.
    pub fn fixed(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            None
        } else {
            Some(Self::Fixed { num, den })
        }
    }

    /// Width divided by height, or `None` for [`AspectRatio::Free`].
    pub fn ratio(&self) -> Option<f64> {
        match self {
            AspectRatio::Free => None,
            AspectRatio::Fixed { num, den } => Some(*num as f64 / *den as f64),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectRatio::Free => f.write_str("free"),
            AspectRatio::Fixed { num, den } => write!(f, "{num}:{den}"),
        }
    }
}

static RATIO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,5})\s*[:x/]\s*(\d{1,5})\s*$").unwrap());

impl FromStr for AspectRatio {
    type Err = WizardError;

    /// Parse `free`, `1:1`, `16x9`, `3/2`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if matches!(lower.as_str(), "free" | "none" | "") {
            return Ok(AspectRatio::Free);
        }
        let invalid = || WizardError::InvalidConfig(format!("invalid aspect ratio '{}'", s));
        let caps = RATIO_RE.captures(&lower).ok_or_else(invalid)?;
        let num: u32 = caps[1].parse().map_err(|_| invalid())?;
        let den: u32 = caps[2].parse().map_err(|_| invalid())?;
        AspectRatio::fixed(num, den).ok_or_else(invalid)
    }
}

/// Encodings the render stage can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    /// Parse from a MIME type string.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WebP",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
