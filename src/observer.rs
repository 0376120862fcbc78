//! Observer trait for wizard events.
//!
//! Inject an [`Arc<dyn WizardObserver>`] via
//! [`crate::config::WizardConfigBuilder::observer`] to receive state
//! transitions, live crop-geometry updates, and the transient notices the
//! host application should show as toasts.
//!
//! # Example
//!
//! ```rust
//! use proofcrop::{Notice, WizardConfig, WizardObserver};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Toasts(Mutex<Vec<String>>);
//!
//! impl WizardObserver for Toasts {
//!     fn on_notice(&self, notice: &Notice) {
//!         self.0.lock().unwrap().push(notice.message.clone());
//!     }
//! }
//!
//! let config = WizardConfig::builder()
//!     .observer(Arc::new(Toasts::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::geometry::CropGeometry;
use crate::wizard::WizardState;
use serde::Serialize;
use std::sync::Arc;

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A short message meant for a transient user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Called by the wizard as it moves through its states.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. Calls happen on whichever task drives
/// the wizard; implementations must be `Send + Sync` because the wizard
/// itself may be moved across tasks.
pub trait WizardObserver: Send + Sync {
    /// Called after every state change.
    fn on_transition(&self, from: WizardState, to: WizardState) {
        let _ = (from, to);
    }

    /// Called on every crop interaction (pan, zoom, rotation, aspect,
    /// free-form resize).
    fn on_geometry_change(&self, geometry: &CropGeometry) {
        let _ = geometry;
    }

    /// Called with a user-facing success or error message.
    fn on_notice(&self, notice: &Notice) {
        let _ = notice;
    }
}

/// A no-op implementation, used when no observer is configured.
pub struct NoopObserver;

impl WizardObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::WizardConfig`].
pub type SharedObserver = Arc<dyn WizardObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        transitions: AtomicUsize,
        geometry: AtomicUsize,
        notices: AtomicUsize,
    }

    impl WizardObserver for Counting {
        fn on_transition(&self, _from: WizardState, _to: WizardState) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_geometry_change(&self, _geometry: &CropGeometry) {
            self.geometry.fetch_add(1, Ordering::SeqCst);
        }

        fn on_notice(&self, _notice: &Notice) {
            self.notices.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_transition(WizardState::Select, WizardState::Crop);
        o.on_geometry_change(&CropGeometry::default());
        o.on_notice(&Notice::error("boom"));
    }

    #[test]
    fn counting_observer_receives_events() {
        let o = Counting::default();
        o.on_transition(WizardState::Select, WizardState::Crop);
        o.on_geometry_change(&CropGeometry::default());
        o.on_geometry_change(&CropGeometry::default());
        o.on_notice(&Notice::success("Image uploaded"));
        assert_eq!(o.transitions.load(Ordering::SeqCst), 1);
        assert_eq!(o.geometry.load(Ordering::SeqCst), 2);
        assert_eq!(o.notices.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: SharedObserver = Arc::new(NoopObserver);
        o.on_transition(WizardState::Crop, WizardState::Preview);
    }
}
