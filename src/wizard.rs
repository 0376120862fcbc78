//! The image acquisition wizard: a four-stage state machine.
//!
//! ```text
//! select ──(valid file)──▶ crop ──(confirm)──▶ preview ──(confirm)──▶ uploading
//!   ▲                       │  ▲                 │                    │    │
//!   └────────(back)─────────┘  └─────(back)──────┘  ◀──(upload failed)─┘    │
//!                                                                          ▼
//! closed ◀──────────────────────(upload succeeded / close)─────────────── ...
//!   │
//!   └──(open)──▶ select
//! ```
//!
//! [`ImageWizard`] owns every transient entity (the source image, the crop
//! stage, the encoded artifact) and the object-URL registry that backs
//! them. Each discarded entity drops its URL guard, so leaving a state is
//! enough to release what it held. [`ImageWizard::live_object_urls`] exposes
//! the count for leak checks.
//!
//! Failures never escape as panics: every method returns a
//! [`WizardError`], leaves the wizard in the documented state, and reports
//! a [`Notice`] to the observer.

use crate::config::WizardConfig;
use crate::error::{EncodeError, UploadError, WizardError};
use crate::object_url::ObjectUrlRegistry;
use crate::observer::{NoopObserver, Notice, SharedObserver};
use crate::pipeline::encode::{
    artifact_file_name, encode_with_fallback, output_format_for, EncodedArtifact, EncodedBlob,
};
use crate::pipeline::geometry::{CropGeometry, CropStage};
use crate::pipeline::render::{decode_source, render_crop};
use crate::pipeline::select::{self, Dimensions, SelectedFile, SourceImage};
use crate::pipeline::upload::{resolve_uploader, UploadFile, Uploader};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};

/// Where the wizard is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardState {
    Select,
    Crop,
    Preview,
    Uploading,
    Closed,
}

impl fmt::Display for WizardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WizardState::Select => "select",
            WizardState::Crop => "crop",
            WizardState::Preview => "preview",
            WizardState::Uploading => "uploading",
            WizardState::Closed => "closed",
        })
    }
}

/// Identifies one upload attempt.
///
/// Only the ticket of the attempt currently in flight is honoured by
/// [`ImageWizard::complete_upload`]; anything else is a stale completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket(u64);

/// An upload handed to the collaborator, not yet resolved.
///
/// Awaiting it yields the collaborator's result, which must be fed back
/// through [`ImageWizard::complete_upload`] together with [`Self::ticket`].
/// The future borrows nothing from the wizard, so it may be spawned or
/// raced against other work.
#[must_use = "the upload only runs when awaited"]
pub struct PendingUpload {
    ticket: UploadTicket,
    future: BoxFuture<'static, Result<(), UploadError>>,
}

impl PendingUpload {
    pub fn ticket(&self) -> UploadTicket {
        self.ticket
    }
}

impl fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpload")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl Future for PendingUpload {
    type Output = Result<(), UploadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

/// One wizard invocation.
pub struct ImageWizard {
    config: WizardConfig,
    registry: ObjectUrlRegistry,
    observer: SharedObserver,
    uploader: Option<Arc<dyn Uploader>>,
    state: WizardState,
    source: Option<SourceImage>,
    crop: Option<CropStage>,
    artifact: Option<EncodedArtifact>,
    next_ticket: u64,
    in_flight: Option<UploadTicket>,
}

impl fmt::Debug for ImageWizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageWizard")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("crop", &self.crop)
            .field("artifact", &self.artifact)
            .field("in_flight", &self.in_flight)
            .field("live_object_urls", &self.registry.live_count())
            .finish()
    }
}

impl ImageWizard {
    /// A wizard opened on the select stage.
    pub fn new(config: WizardConfig) -> Self {
        let observer = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver));
        Self {
            config,
            registry: ObjectUrlRegistry::new(),
            observer,
            uploader: None,
            state: WizardState::Select,
            source: None,
            crop: None,
            artifact: None,
            next_ticket: 0,
            in_flight: None,
        }
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    /// The accepted source image, from crop until the wizard returns to
    /// select or closes.
    pub fn source(&self) -> Option<&SourceImage> {
        self.source.as_ref()
    }

    /// The crop stage. Kept through preview so `back` restores it.
    pub fn crop_stage(&self) -> Option<&CropStage> {
        self.crop.as_ref()
    }

    /// Mutable crop stage; only available while cropping.
    pub fn crop_stage_mut(&mut self) -> Option<&mut CropStage> {
        if self.state == WizardState::Crop {
            self.crop.as_mut()
        } else {
            None
        }
    }

    /// The encoded artifact shown on the preview (and while uploading).
    pub fn preview(&self) -> Option<&EncodedArtifact> {
        match self.state {
            WizardState::Preview | WizardState::Uploading => self.artifact.as_ref(),
            _ => None,
        }
    }

    /// Object URLs currently allocated by this wizard.
    pub fn live_object_urls(&self) -> usize {
        self.registry.live_count()
    }

    /// Registry backing this wizard's object URLs, for resolving them.
    pub fn object_urls(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Reopen a closed wizard on the select stage with all state reset.
    pub fn open(&mut self) -> Result<(), WizardError> {
        self.require(WizardState::Closed, "open the wizard")?;
        self.release_all();
        self.transition(WizardState::Select);
        Ok(())
    }

    /// Validate `file` and move to the crop stage.
    ///
    /// On rejection the wizard stays on select and nothing is allocated.
    ///
    /// Dimensions normally come from a header probe. When the probe cannot
    /// read them, the whole file is decoded on the calling thread, which
    /// costs as much as a full decode of the image. Async callers that
    /// accept such files should run this under `spawn_blocking`.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<(), WizardError> {
        self.require(WizardState::Select, "select a file")?;

        let mut source = match select::accept(file, &self.config, &self.registry) {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e.into())),
        };

        let dims = match source.dimensions() {
            Some(d) => d,
            None => match decode_source(source.bytes()) {
                Ok(img) => {
                    let d = Dimensions::new(img.width(), img.height());
                    source.set_dimensions(d);
                    d
                }
                Err(e) => {
                    // Stay lenient: the crop stage opens on a placeholder and
                    // confirming reports the decode failure.
                    warn!("'{}' could not be decoded yet: {}", source.name(), e);
                    Dimensions::new(1, 1)
                }
            },
        };

        self.crop = Some(CropStage::new(dims).with_observer(Some(Arc::clone(&self.observer))));
        self.source = Some(source);
        self.transition(WizardState::Crop);
        Ok(())
    }

    /// Step back one stage.
    ///
    /// From crop this discards the source and its geometry. From preview it
    /// discards only the artifact; the crop stage comes back as it was.
    pub fn back(&mut self) -> Result<(), WizardError> {
        match self.state {
            WizardState::Crop => {
                self.release_all();
                self.transition(WizardState::Select);
                Ok(())
            }
            WizardState::Preview => {
                self.artifact = None;
                self.transition(WizardState::Crop);
                Ok(())
            }
            state => Err(self.fail(WizardError::InvalidTransition {
                state,
                action: "go back",
            })),
        }
    }

    /// Render and encode the current crop, then move to preview.
    ///
    /// The CPU-bound work runs on the blocking pool. On failure the wizard
    /// stays on crop with the geometry untouched.
    pub async fn confirm_crop(&mut self) -> Result<(), WizardError> {
        self.require(WizardState::Crop, "confirm the crop")?;
        let (Some(source), Some(stage)) = (self.source.as_ref(), self.crop.as_ref()) else {
            return Err(self.fail(WizardError::InvalidTransition {
                state: self.state,
                action: "confirm the crop",
            }));
        };

        // At most one artifact is live.
        self.artifact = None;

        let geometry = stage.confirm();
        let bytes = Arc::clone(source.bytes());
        let format = output_format_for(source.mime_type(), &self.config);
        let source_name = source.name().to_string();
        let config = self.config.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<EncodedBlob, EncodeError> {
            let image = decode_source(&bytes)?;
            let raster = render_crop(&image, &geometry)?;
            encode_with_fallback(&raster, format, &config)
        })
        .await
        .map_err(|e| EncodeError::TaskAborted(e.to_string()))
        .and_then(|r| r);

        let blob = match result {
            Ok(blob) => blob,
            Err(e) => return Err(self.fail(e.into())),
        };

        let url = self
            .registry
            .create(Arc::clone(&blob.bytes), blob.format.mime_type());
        let file_name = artifact_file_name(&source_name, blob.format);
        info!(
            "Encoded {} ({}x{}, {} bytes)",
            file_name,
            blob.dimensions.width,
            blob.dimensions.height,
            blob.bytes.len()
        );
        self.artifact = Some(EncodedArtifact::new(blob, file_name, url));
        self.transition(WizardState::Preview);
        Ok(())
    }

    /// Hand the artifact to the uploader and move to uploading.
    pub fn begin_upload(&mut self) -> Result<PendingUpload, WizardError> {
        self.require(WizardState::Preview, "upload")?;

        let uploader = match self.uploader.clone() {
            Some(u) => u,
            None => match resolve_uploader(&self.config) {
                Ok(u) => {
                    self.uploader = Some(Arc::clone(&u));
                    u
                }
                Err(e) => return Err(self.fail(e)),
            },
        };

        let Some(artifact) = self.artifact.as_ref() else {
            return Err(self.fail(WizardError::InvalidTransition {
                state: self.state,
                action: "upload",
            }));
        };
        let file = UploadFile {
            file_name: artifact.file_name().to_string(),
            mime_type: artifact.mime_type().to_string(),
            bytes: Arc::clone(artifact.bytes()),
        };

        self.next_ticket += 1;
        let ticket = UploadTicket(self.next_ticket);
        self.in_flight = Some(ticket);
        self.transition(WizardState::Uploading);

        Ok(PendingUpload {
            ticket,
            future: uploader.upload(file),
        })
    }

    /// Apply the collaborator's result for `ticket`.
    ///
    /// Success closes the wizard; failure returns it to preview with the
    /// same artifact. Results for anything but the upload in flight
    /// (including every result arriving after `close`) are ignored.
    pub fn complete_upload(
        &mut self,
        ticket: UploadTicket,
        result: Result<(), UploadError>,
    ) -> Result<(), WizardError> {
        if self.state != WizardState::Uploading || self.in_flight != Some(ticket) {
            debug!("Ignoring stale upload completion {:?}", ticket);
            return Ok(());
        }
        self.in_flight = None;

        match result {
            Ok(()) => {
                self.notify(Notice::success("Image uploaded successfully"));
                self.close();
                Ok(())
            }
            Err(e) => {
                self.transition(WizardState::Preview);
                Err(self.fail(e.into()))
            }
        }
    }

    /// Upload and wait for the result.
    pub async fn confirm_upload(&mut self) -> Result<(), WizardError> {
        let pending = self.begin_upload()?;
        let ticket = pending.ticket();
        let result = pending.await;
        self.complete_upload(ticket, result)
    }

    /// Whether removing the stored image is offered right now.
    pub fn can_remove(&self) -> bool {
        self.state == WizardState::Select
            && self.config.remover.is_some()
            && self.config.current_image_url.is_some()
    }

    /// Remove the stored image instead of replacing it. Closes the wizard
    /// on success.
    pub async fn remove_existing(&mut self) -> Result<(), WizardError> {
        self.require(WizardState::Select, "remove the current image")?;
        let remover = match (&self.config.remover, &self.config.current_image_url) {
            (Some(remover), Some(_)) => Arc::clone(remover),
            _ => return Err(self.fail(WizardError::RemovalUnavailable)),
        };

        match remover.remove().await {
            Ok(()) => {
                self.notify(Notice::success("Image removed"));
                self.close();
                Ok(())
            }
            Err(e) => Err(self.fail(WizardError::RemovalFailed(e))),
        }
    }

    /// Close from any state, releasing everything the wizard holds.
    ///
    /// An upload still in flight keeps running, but its result will be
    /// ignored.
    pub fn close(&mut self) {
        if self.in_flight.take().is_some() {
            debug!("Closing with an upload in flight; its result will be ignored");
        }
        self.release_all();
        self.transition(WizardState::Closed);
    }

    /// The geometry the crop stage currently shows.
    pub fn geometry(&self) -> Option<&CropGeometry> {
        self.crop.as_ref().map(|c| c.geometry())
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn require(&self, expected: WizardState, action: &'static str) -> Result<(), WizardError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.fail(WizardError::InvalidTransition {
                state: self.state,
                action,
            }))
        }
    }

    fn release_all(&mut self) {
        self.artifact = None;
        self.crop = None;
        self.source = None;
    }

    fn transition(&mut self, to: WizardState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!("Wizard: {} → {}", from, to);
        self.observer.on_transition(from, to);
    }

    fn notify(&self, notice: Notice) {
        self.observer.on_notice(&notice);
    }

    /// Log `err`, tell the observer, and hand it back for returning.
    fn fail(&self, err: WizardError) -> WizardError {
        warn!("{}", err);
        self.notify(Notice::error(err.user_message()));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AspectRatio;
    use crate::observer::{NoticeLevel, WizardObserver};
    use crate::pipeline::upload::upload_fn;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        transitions: Mutex<Vec<(WizardState, WizardState)>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl WizardObserver for Recorder {
        fn on_transition(&self, from: WizardState, to: WizardState) {
            self.transitions.lock().unwrap().push((from, to));
        }

        fn on_notice(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    fn image_file(w: u32, h: u32, format: ImageFormat) -> SelectedFile {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([30, 120, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        SelectedFile::new(
            format!("proof.{}", format.extensions_str()[0]),
            format.to_mime_type(),
            buf,
        )
    }

    fn wizard_with(recorder: &Arc<Recorder>) -> ImageWizard {
        let config = WizardConfig::builder()
            .observer(Arc::clone(recorder) as SharedObserver)
            .uploader(upload_fn(|_| async { Ok::<(), UploadError>(()) }))
            .build()
            .unwrap();
        ImageWizard::new(config)
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(WizardState::Uploading.to_string(), "uploading");
        assert_eq!(WizardState::Select.to_string(), "select");
    }

    #[test]
    fn starts_on_select() {
        let w = ImageWizard::new(WizardConfig::default());
        assert_eq!(w.state(), WizardState::Select);
        assert_eq!(w.live_object_urls(), 0);
        assert!(w.preview().is_none());
    }

    #[test]
    fn invalid_actions_keep_state_and_notify() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        let err = w.back().unwrap_err();
        assert!(matches!(err, WizardError::InvalidTransition { state: WizardState::Select, .. }));
        assert!(w.begin_upload().is_err());
        assert!(w.open().is_err());
        assert_eq!(w.state(), WizardState::Select);
        assert!(rec.transitions.lock().unwrap().is_empty());
        assert_eq!(rec.notices.lock().unwrap().len(), 3);
    }

    #[test]
    fn rejected_file_stays_on_select_with_notice() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        let mut file = image_file(4, 4, ImageFormat::Png);
        file.mime_type = "image/gif".into();
        assert!(matches!(w.select_file(file), Err(WizardError::Validation(_))));
        assert_eq!(w.state(), WizardState::Select);
        assert_eq!(w.live_object_urls(), 0);
        let notices = rec.notices.lock().unwrap();
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].message.contains("JPEG, PNG, WebP"));
    }

    #[test]
    fn back_from_crop_releases_source() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        w.select_file(image_file(10, 10, ImageFormat::Png)).unwrap();
        assert_eq!(w.state(), WizardState::Crop);
        assert_eq!(w.live_object_urls(), 1);
        w.back().unwrap();
        assert_eq!(w.state(), WizardState::Select);
        assert_eq!(w.live_object_urls(), 0);
        assert!(w.source().is_none() && w.crop_stage().is_none());
    }

    #[tokio::test]
    async fn reconfirm_replaces_artifact() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        w.select_file(image_file(40, 20, ImageFormat::Png)).unwrap();
        w.confirm_crop().await.unwrap();
        let first = w.preview().unwrap().url().as_str().to_string();
        assert_eq!(w.live_object_urls(), 2);

        w.back().unwrap();
        assert_eq!(w.live_object_urls(), 1);
        w.crop_stage_mut().unwrap().set_aspect(AspectRatio::SQUARE);
        w.confirm_crop().await.unwrap();
        let second = w.preview().unwrap();
        assert_ne!(second.url().as_str(), first);
        assert_eq!(second.dimensions(), Dimensions::new(20, 20));
        assert_eq!(w.live_object_urls(), 2);
        assert!(w.object_urls().resolve(&first).is_none());
    }

    #[tokio::test]
    async fn undecodable_source_stays_on_crop() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        w.select_file(SelectedFile::new("bad.jpg", "image/jpeg", vec![0xFFu8, 0xD8, 0, 1]))
            .unwrap();
        assert_eq!(w.state(), WizardState::Crop);
        let err = w.confirm_crop().await.unwrap_err();
        assert!(matches!(err, WizardError::Encode(EncodeError::Decode { .. })));
        assert_eq!(w.state(), WizardState::Crop);
        let notices = rec.notices.lock().unwrap();
        assert_eq!(
            notices.last().unwrap().message,
            "Failed to process image. Please adjust the crop and try again."
        );
    }

    #[tokio::test]
    async fn select_file_can_run_on_the_blocking_pool() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        let file = SelectedFile::new("bad.jpg", "image/jpeg", vec![0xFFu8, 0xD8, 0, 1]);
        let (w, result) = tokio::task::spawn_blocking(move || {
            let result = w.select_file(file);
            (w, result)
        })
        .await
        .unwrap();
        assert!(result.is_ok());
        assert_eq!(w.state(), WizardState::Crop);
        assert_eq!(w.live_object_urls(), 1);
    }

    #[tokio::test]
    async fn missing_uploader_keeps_preview() {
        let mut w = ImageWizard::new(WizardConfig::default());
        w.select_file(image_file(8, 8, ImageFormat::Jpeg)).unwrap();
        w.confirm_crop().await.unwrap();
        if std::env::var(crate::config::UPLOAD_URL_ENV).is_err() {
            assert!(matches!(
                w.begin_upload(),
                Err(WizardError::UploaderNotConfigured)
            ));
            assert_eq!(w.state(), WizardState::Preview);
        }
    }

    #[tokio::test]
    async fn crop_stage_is_read_only_outside_crop() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        w.select_file(image_file(8, 8, ImageFormat::Png)).unwrap();
        w.confirm_crop().await.unwrap();
        assert!(w.crop_stage_mut().is_none());
        assert!(w.crop_stage().is_some());
    }

    #[tokio::test]
    async fn transitions_are_reported_in_order() {
        let rec = Arc::new(Recorder::default());
        let mut w = wizard_with(&rec);
        w.select_file(image_file(8, 8, ImageFormat::WebP)).unwrap();
        w.confirm_crop().await.unwrap();
        w.confirm_upload().await.unwrap();
        assert_eq!(
            *rec.transitions.lock().unwrap(),
            vec![
                (WizardState::Select, WizardState::Crop),
                (WizardState::Crop, WizardState::Preview),
                (WizardState::Preview, WizardState::Uploading),
                (WizardState::Uploading, WizardState::Closed),
            ]
        );
        assert_eq!(w.live_object_urls(), 0);
    }
}
