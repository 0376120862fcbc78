//! Selector: validate a user-chosen file and turn it into a [`SourceImage`].
//!
//! Checks run in a fixed order: MIME type against the allow-list, then size
//! against the ceiling. Only a file that passes both is touched further.
//! The pixel-dimension probe that follows is best-effort. A file whose
//! header cannot be read is still accepted with unknown dimensions and a
//! warning in the log.

use crate::config::WizardConfig;
use crate::error::{ValidationError, WizardError};
use crate::object_url::{ObjectUrl, ObjectUrlRegistry};
use image::ImageReader;
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A file handed over by the picker or a drag-drop.
#[derive(Clone)]
pub struct SelectedFile {
    pub name: String,
    /// MIME type as declared by the picker.
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl std::fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl SelectedFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, declaring its MIME type the way a browser
    /// picker would: from the extension, falling back to the content.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, WizardError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| WizardError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime_type = infer_mime(path, &bytes);
        debug!("Read {} ({} bytes, declared {})", path.display(), bytes.len(), mime_type);

        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Map a path and its bytes to a MIME type string.
///
/// Unknown formats map to `application/octet-stream`, which the selector
/// then rejects as an invalid type.
pub fn infer_mime(path: &Path, bytes: &[u8]) -> String {
    let format = image::ImageFormat::from_path(path)
        .ok()
        .or_else(|| image::guess_format(bytes).ok());
    match format {
        Some(f) => f.to_mime_type().to_string(),
        None => "application/octet-stream".to_string(),
    }
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A validated selection, owning its object URL.
#[derive(Debug)]
pub struct SourceImage {
    name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
    dimensions: Option<Dimensions>,
    url: ObjectUrl,
}

impl SourceImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn byte_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Probed dimensions; `None` when the header could not be read.
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub(crate) fn set_dimensions(&mut self, dims: Dimensions) {
        self.dimensions = Some(dims);
    }

    pub fn url(&self) -> &ObjectUrl {
        &self.url
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Serializable summary for logs and the CLI.
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            byte_len: self.byte_len(),
            dimensions: self.dimensions,
        }
    }
}

/// Plain-data view of a [`SourceImage`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub mime_type: String,
    pub byte_len: u64,
    pub dimensions: Option<Dimensions>,
}

/// Validate `file` and register an object URL for it.
///
/// On error nothing is allocated.
pub fn accept(
    file: SelectedFile,
    config: &WizardConfig,
    registry: &ObjectUrlRegistry,
) -> Result<SourceImage, ValidationError> {
    if !config.accepts_mime(&file.mime_type) {
        return Err(ValidationError::InvalidType {
            mime_type: file.mime_type,
        });
    }

    if file.len() > config.max_file_bytes {
        return Err(ValidationError::TooLarge {
            size: file.len(),
            max: config.max_file_bytes,
        });
    }

    let dimensions = match probe_dimensions(&file.bytes) {
        Ok(d) => Some(d),
        Err(detail) => {
            warn!("Could not read dimensions of '{}': {}", file.name, detail);
            None
        }
    };

    let url = registry.create(Arc::clone(&file.bytes), file.mime_type.clone());
    info!(
        "Accepted '{}' ({}, {} bytes, {})",
        file.name,
        file.mime_type,
        file.len(),
        dimensions
            .map(|d| format!("{}x{}", d.width, d.height))
            .unwrap_or_else(|| "unknown size".to_string())
    );

    Ok(SourceImage {
        name: file.name,
        mime_type: file.mime_type,
        bytes: file.bytes,
        dimensions,
        url,
    })
}

/// Read width and height from the image header without decoding pixels.
pub fn probe_dimensions(bytes: &[u8]) -> Result<Dimensions, String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
    Ok(Dimensions::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(w, h));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode test png");
        buf
    }

    #[test]
    fn accepts_valid_png_and_probes_dimensions() {
        let reg = ObjectUrlRegistry::new();
        let file = SelectedFile::new("a.png", "image/png", png_bytes(40, 30));
        let src = accept(file, &WizardConfig::default(), &reg).expect("valid file");
        assert_eq!(src.dimensions(), Some(Dimensions::new(40, 30)));
        assert_eq!(src.mime_type(), "image/png");
        assert_eq!(reg.live_count(), 1);
        assert!(reg.resolve(src.url().as_str()).is_some());
    }

    #[test]
    fn rejects_disallowed_types_without_allocating() {
        let reg = ObjectUrlRegistry::new();
        for mime in ["image/gif", "image/bmp", "text/plain", "image/svg+xml", ""] {
            let file = SelectedFile::new("x", mime, png_bytes(2, 2));
            let err = accept(file, &WizardConfig::default(), &reg).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidType { .. }), "{mime}");
        }
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn rejects_oversized_files() {
        let reg = ObjectUrlRegistry::new();
        let file = SelectedFile::new("big.png", "image/png", vec![0u8; 25 * 1024 * 1024]);
        let err = accept(file, &WizardConfig::default(), &reg).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooLarge {
                size: 25 * 1024 * 1024,
                max: 20 * 1024 * 1024
            }
        );
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn exactly_at_ceiling_is_accepted() {
        let reg = ObjectUrlRegistry::new();
        let config = WizardConfig::builder().max_file_bytes(8).build().unwrap();
        let file = SelectedFile::new("x.jpg", "image/jpeg", vec![0u8; 8]);
        assert!(accept(file, &config, &reg).is_ok());
    }

    #[test]
    fn type_is_checked_before_size() {
        let reg = ObjectUrlRegistry::new();
        let config = WizardConfig::builder().max_file_bytes(4).build().unwrap();
        let file = SelectedFile::new("x.gif", "image/gif", vec![0u8; 64]);
        let err = accept(file, &config, &reg).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
    }

    #[test]
    fn unreadable_header_is_not_fatal() {
        let reg = ObjectUrlRegistry::new();
        let file = SelectedFile::new("broken.jpg", "image/jpeg", vec![1u8, 2, 3, 4, 5]);
        let src = accept(file, &WizardConfig::default(), &reg).expect("lenient probe");
        assert_eq!(src.dimensions(), None);
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn infer_mime_from_extension_then_content() {
        let png = png_bytes(1, 1);
        assert_eq!(infer_mime(Path::new("a.JPG"), &[]), "image/jpeg");
        assert_eq!(infer_mime(Path::new("a.webp"), &[]), "image/webp");
        assert_eq!(infer_mime(Path::new("noext"), &png), "image/png");
        assert_eq!(
            infer_mime(Path::new("noext"), b"hello"),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, png_bytes(3, 2)).unwrap();
        let file = SelectedFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "shot.png");
        assert_eq!(file.mime_type, "image/png");
        assert!(!file.is_empty());
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let err = SelectedFile::from_path("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert!(matches!(err, WizardError::ReadFailed { .. }));
    }
}
