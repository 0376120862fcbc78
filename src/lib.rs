//! # proofcrop
//!
//! Select, crop, rotate, re-encode and upload a proof image.
//!
//! The crate models the image acquisition step of a guild dashboard (the
//! "upload a screenshot as raid attendance proof" dialog) as a plain Rust
//! state machine. There is no UI here: a front-end (or the bundled CLI)
//! feeds user actions into an [`ImageWizard`] and renders what it reports.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Select   type allow-list + 20 MiB ceiling, dimension probe
//!  ├─ 2. Crop     zoom 1–3×, rotation 0–359°, aspect presets
//!  ├─ 3. Render   rotate about centre, then cut the rectangle (spawn_blocking)
//!  ├─ 4. Encode   keep JPEG/PNG/WebP, else fall back; one retry on failure
//!  └─ 5. Upload   injected collaborator or multipart HTTP endpoint
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proofcrop::{upload_fn, AspectRatio, ImageWizard, SelectedFile, WizardConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WizardConfig::builder()
//!         .uploader(upload_fn(|file| async move {
//!             println!("uploading {} ({} bytes)", file.file_name, file.bytes.len());
//!             Ok::<(), proofcrop::UploadError>(())
//!         }))
//!         .build()?;
//!
//!     let mut wizard = ImageWizard::new(config);
//!     wizard.select_file(SelectedFile::from_path("raid.png").await?)?;
//!
//!     if let Some(stage) = wizard.crop_stage_mut() {
//!         stage.set_aspect(AspectRatio::SQUARE);
//!         stage.set_zoom(1.5);
//!     }
//!     wizard.confirm_crop().await?;
//!     wizard.confirm_upload().await?;
//!     assert_eq!(wizard.live_object_urls(), 0);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `proofcrop` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! proofcrop = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod object_url;
pub mod observer;
pub mod pipeline;
pub mod wizard;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AspectRatio, OutputFormat, WizardConfig, WizardConfigBuilder, ACCEPTED_MIME_TYPES,
    MAX_FILE_BYTES,
};
pub use error::{EncodeError, UploadError, ValidationError, WizardError};
pub use object_url::{ObjectBlob, ObjectUrl, ObjectUrlRegistry};
pub use observer::{NoopObserver, Notice, NoticeLevel, SharedObserver, WizardObserver};
pub use pipeline::encode::{encode_image, EncodedArtifact, EncodedBlob};
pub use pipeline::geometry::{rotated_bounds, CropGeometry, CropRect, CropStage};
pub use pipeline::render::render_crop;
pub use pipeline::select::{accept, Dimensions, SelectedFile, SourceImage, SourceInfo};
pub use pipeline::upload::{
    remove_fn, upload_fn, HttpRemover, HttpUploader, Remover, UploadFile, Uploader,
};
pub use wizard::{ImageWizard, PendingUpload, UploadTicket, WizardState};
