//! Error types for the proofcrop library.
//!
//! Each wizard stage has its own error type so callers can tell at a glance
//! where a failure happened and what state the wizard is left in:
//!
//! * [`ValidationError`]: the selected file was rejected. The wizard stays
//!   in `Select`.
//! * [`EncodeError`]: the crop could not be rendered or serialised. The
//!   wizard stays in `Crop`.
//! * [`UploadError`]: the upload collaborator rejected the artifact. The
//!   wizard reverts from `Uploading` to `Preview`.
//!
//! [`WizardError`] wraps all three plus the state-machine and configuration
//! failures, and is what the [`crate::wizard::ImageWizard`] methods return.
//! Every `Display` string is written to be shown to the end user verbatim.

use crate::wizard::WizardState;
use std::borrow::Borrow;
use std::path::PathBuf;
use thiserror::Error;

/// Formats accepted by the selector, spelled for humans.
pub const ACCEPTED_FORMATS_LABEL: &str = "JPEG, PNG, WebP";

/// A selected file violated one of the selector's constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The declared MIME type is not on the allow-list.
    #[error("Invalid file type '{mime_type}'. Accepted formats: {}.", ACCEPTED_FORMATS_LABEL)]
    InvalidType { mime_type: String },

    /// The file exceeds the size ceiling.
    #[error(
        "File is too large ({}). Maximum size is {}.",
        format_mib(.size),
        format_mib(.max)
    )]
    TooLarge { size: u64, max: u64 },
}

/// The crop could not be turned into an encoded image.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The source bytes could not be decoded into pixels.
    #[error("Failed to process image: source could not be decoded ({detail})")]
    Decode { detail: String },

    /// The crop rectangle has no area once mapped to whole pixels.
    #[error("Failed to process image: crop area is empty ({width}x{height})")]
    EmptyCrop { width: u32, height: u32 },

    /// The encoder rejected the rendered pixels.
    #[error("Failed to process image: {format} encoding failed ({detail})")]
    Serialize { format: &'static str, detail: String },

    /// The blocking render task died.
    #[error("Failed to process image: render task aborted ({0})")]
    TaskAborted(String),
}

impl EncodeError {
    /// Message shown to the user. Encode failures are reported generically;
    /// the detailed `Display` form is meant for logs.
    pub fn user_message(&self) -> &'static str {
        "Failed to process image. Please adjust the crop and try again."
    }
}

/// The upload (or removal) collaborator failed.
///
/// Opaque on purpose: it wraps whatever the collaborator rejected with,
/// keeping the message and, when there is one, the underlying error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct UploadError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl UploadError {
    /// An upload error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// An upload error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// All errors returned by [`crate::wizard::ImageWizard`].
#[derive(Debug, Error)]
pub enum WizardError {
    // ── Stage errors ──────────────────────────────────────────────────────
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    // ── State machine ─────────────────────────────────────────────────────
    /// The requested action is not available in the current state.
    #[error("Cannot {action} while the wizard is in the {state} state")]
    InvalidTransition {
        state: WizardState,
        action: &'static str,
    },

    /// The removal collaborator failed.
    #[error("Removing the current image failed: {0}")]
    RemovalFailed(#[source] UploadError),

    /// Removal was requested but no removal collaborator or no current
    /// image is available.
    #[error("Removing the current image is not available")]
    RemovalUnavailable,

    // ── Setup ─────────────────────────────────────────────────────────────
    /// No upload collaborator could be resolved.
    #[error(
        "No upload destination configured.\n\
Inject an uploader, set an upload endpoint, or export PROOFCROP_UPLOAD_URL."
    )]
    UploaderNotConfigured,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading an input file from disk failed.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the encoded artifact to disk failed.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WizardError {
    /// Text for a transient user notification.
    pub fn user_message(&self) -> String {
        match self {
            WizardError::Encode(e) => e.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Render a byte count as mebibytes, dropping a trailing `.0`.
pub(crate) fn format_mib(bytes: impl Borrow<u64>) -> String {
    let mib = *bytes.borrow() as f64 / (1024.0 * 1024.0);
    if (mib - mib.round()).abs() < 0.05 {
        format!("{:.0} MiB", mib.round())
    } else {
        format!("{:.1} MiB", mib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_type_names_accepted_formats() {
        let e = ValidationError::InvalidType {
            mime_type: "image/gif".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("image/gif"), "got: {msg}");
        assert!(msg.contains("JPEG, PNG, WebP"), "got: {msg}");
    }

    #[test]
    fn too_large_names_size_and_ceiling() {
        let e = ValidationError::TooLarge {
            size: 25 * 1024 * 1024,
            max: 20 * 1024 * 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("25 MiB"), "got: {msg}");
        assert!(msg.contains("Maximum size is 20 MiB"), "got: {msg}");
    }

    #[test]
    fn validation_messages_differ_by_kind() {
        let t = ValidationError::InvalidType {
            mime_type: "text/plain".into(),
        }
        .to_string();
        let s = ValidationError::TooLarge { size: 30, max: 20 }.to_string();
        assert_ne!(t, s);
        assert!(!t.contains("too large"));
        assert!(!s.contains("Invalid file type"));
    }

    #[test]
    fn encode_error_user_message_is_generic() {
        let e = WizardError::from(EncodeError::Decode {
            detail: "bad huffman table".into(),
        });
        assert!(!e.user_message().contains("huffman"));
    }

    #[test]
    fn upload_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let e = UploadError::with_source("network down", io);
        assert_eq!(e.message(), "network down");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn format_mib_rounding() {
        assert_eq!(format_mib(20u64 * 1024 * 1024), "20 MiB");
        assert_eq!(format_mib(1024u64 * 1024 + 512 * 1024), "1.5 MiB");
    }

    #[test]
    fn invalid_transition_display() {
        let e = WizardError::InvalidTransition {
            state: WizardState::Uploading,
            action: "go back",
        };
        assert_eq!(
            e.to_string(),
            "Cannot go back while the wizard is in the uploading state"
        );
    }
}
