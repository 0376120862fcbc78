//! Encode stage: serialise the rendered raster into an uploadable blob.
//!
//! The output keeps the source's type when the config asks for it and the
//! type is one we can write; otherwise the configured fallback is used. If
//! the preferred encoder fails on the pixels it is given, encoding is
//! retried once in the fallback format before giving up.

use crate::config::{OutputFormat, WizardConfig};
use crate::error::{EncodeError, WizardError};
use crate::object_url::ObjectUrl;
use crate::pipeline::select::Dimensions;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encoded bytes plus what they are.
#[derive(Clone)]
pub struct EncodedBlob {
    pub format: OutputFormat,
    pub bytes: Arc<[u8]>,
    pub dimensions: Dimensions,
}

impl std::fmt::Debug for EncodedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedBlob")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Choose the output format for a source of type `source_mime`.
pub fn output_format_for(source_mime: &str, config: &WizardConfig) -> OutputFormat {
    if config.preserve_source_format {
        if let Some(format) = OutputFormat::from_mime(source_mime) {
            return format;
        }
    }
    config.fallback_format
}

/// Encode `img` in `format`. `quality` only affects JPEG.
pub fn encode_image(
    img: &RgbaImage,
    format: OutputFormat,
    quality: u8,
) -> Result<EncodedBlob, EncodeError> {
    let (width, height) = img.dimensions();
    let mut buf = Vec::new();

    let result = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel; transparent areas flatten to black.
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut buf).write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        }
        OutputFormat::WebP => WebPEncoder::new_lossless(&mut buf).write_image(
            img.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
    };

    result.map_err(|e| EncodeError::Serialize {
        format: format.label(),
        detail: e.to_string(),
    })?;

    debug!("Encoded {}x{} {} → {} bytes", width, height, format, buf.len());

    Ok(EncodedBlob {
        format,
        bytes: Arc::from(buf),
        dimensions: Dimensions::new(width, height),
    })
}

/// Encode in the preferred format, retrying once with the fallback.
pub fn encode_with_fallback(
    img: &RgbaImage,
    preferred: OutputFormat,
    config: &WizardConfig,
) -> Result<EncodedBlob, EncodeError> {
    match encode_image(img, preferred, config.jpeg_quality) {
        Ok(blob) => Ok(blob),
        Err(e) if preferred != config.fallback_format => {
            warn!(
                "{} encoding failed ({}); falling back to {}",
                preferred, e, config.fallback_format
            );
            encode_image(img, config.fallback_format, config.jpeg_quality)
        }
        Err(e) => Err(e),
    }
}

/// The confirmed crop: encoded bytes plus the object URL that renders them.
#[derive(Debug)]
pub struct EncodedArtifact {
    blob: EncodedBlob,
    file_name: String,
    url: ObjectUrl,
}

impl EncodedArtifact {
    pub(crate) fn new(blob: EncodedBlob, file_name: String, url: ObjectUrl) -> Self {
        Self {
            blob,
            file_name,
            url,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.blob.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.blob.format.mime_type()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.blob.dimensions
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.blob.bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn url(&self) -> &ObjectUrl {
        &self.url
    }

    /// Inline `data:` URI for previews that cannot resolve object URLs.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.blob.bytes))
    }

    /// Write the bytes to `path` atomically (temp file in the same
    /// directory, then rename).
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), WizardError> {
        let path = path.as_ref();
        let write_err = |e: std::io::Error| WizardError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&self.blob.bytes).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        info!("Saved {} ({} bytes)", path.display(), self.blob.bytes.len());
        Ok(())
    }
}

/// File name for the uploaded artifact: `<source stem>-cropped.<ext>`.
pub fn artifact_file_name(source_name: &str, format: OutputFormat) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}-cropped.{}", stem, format.extension())
}
