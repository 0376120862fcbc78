//! Crop stage: interactive crop/zoom/rotate state producing a crop rectangle.
//!
//! ## Coordinate space
//!
//! The crop rectangle is always expressed in pixels of the *rotated* source:
//! the source rotated about its centre onto a canvas sized to the rotated
//! bounding box ([`rotated_bounds`]). At rotation 0 that is exactly the
//! source's own pixel grid. The renderer uses the same space, so no further
//! translation happens between the crop stage and the encoder.
//!
//! ## Zoom model
//!
//! The stage keeps an unzoomed *base* size and a *centre*. The visible
//! rectangle is `base / zoom` around the centre, clamped inside the rotated
//! bounds. Clamping only ever translates the rectangle, so a fixed aspect
//! ratio survives every pan, zoom and rotation.

use crate::config::{AspectRatio, MAX_ZOOM, MIN_ZOOM};
use crate::observer::SharedObserver;
use crate::pipeline::select::Dimensions;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Axis-aligned crop rectangle in rotated-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Snap to whole pixels inside `bounds`.
    ///
    /// The size is rounded once and the origin is then clamped so the whole
    /// span fits, so the pixel size never depends on where the rectangle
    /// sits. Returns `(x, y, width, height)`, or `None` when nothing is left.
    pub fn to_pixels(&self, bounds: Dimensions) -> Option<(u32, u32, u32, u32)> {
        let bw = bounds.width as f64;
        let bh = bounds.height as f64;
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return None;
        }
        if self.x >= bw || self.y >= bh || self.x + self.width <= 0.0 || self.y + self.height <= 0.0
        {
            return None;
        }
        let w = self.width.round().min(bw);
        let h = self.height.round().min(bh);
        if w < 1.0 || h < 1.0 {
            return None;
        }
        let x = self.x.round().clamp(0.0, bw - w);
        let y = self.y.round().clamp(0.0, bh - h);
        Some((x as u32, y as u32, w as u32, h as u32))
    }
}

/// Everything the user chose on the crop stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropGeometry {
    pub rect: CropRect,
    /// Zoom factor in `[1.0, 3.0]`.
    pub zoom: f64,
    /// Clockwise rotation in whole degrees, `0..360`.
    pub rotation: u16,
    pub aspect: AspectRatio,
}

impl Default for CropGeometry {
    fn default() -> Self {
        Self {
            rect: CropRect::default(),
            zoom: MIN_ZOOM,
            rotation: 0,
            aspect: AspectRatio::Free,
        }
    }
}

/// Wrap any whole-degree angle into `0..360`.
pub fn normalize_rotation(degrees: i32) -> u16 {
    degrees.rem_euclid(360) as u16
}

/// Bounding box of a `width` x `height` image rotated by `rotation` degrees,
/// rounded to whole pixels.
pub fn rotated_bounds(source: Dimensions, rotation: u16) -> Dimensions {
    let (w, h) = (source.width, source.height);
    match rotation % 360 {
        0 | 180 => Dimensions::new(w, h),
        90 | 270 => Dimensions::new(h, w),
        r => {
            let theta = (r as f64).to_radians();
            let (s, c) = (theta.sin().abs(), theta.cos().abs());
            let (w, h) = (w as f64, h as f64);
            Dimensions::new(
                (w * c + h * s).round().max(1.0) as u32,
                (w * s + h * c).round().max(1.0) as u32,
            )
        }
    }
}

/// Interactive crop state for one source image.
pub struct CropStage {
    source: Dimensions,
    bounds: Dimensions,
    base: (f64, f64),
    /// Unzoomed size the user asked for with a free aspect, before it is
    /// shrunk into the current rotated bounds.
    requested: (f64, f64),
    center: (f64, f64),
    geometry: CropGeometry,
    observer: Option<SharedObserver>,
}

impl std::fmt::Debug for CropStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CropStage")
            .field("source", &self.source)
            .field("bounds", &self.bounds)
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl CropStage {
    /// A stage covering the whole image: free aspect, zoom 1, no rotation.
    pub fn new(source: Dimensions) -> Self {
        let source = Dimensions::new(source.width.max(1), source.height.max(1));
        let mut stage = Self {
            source,
            bounds: source,
            base: (source.width as f64, source.height as f64),
            requested: (source.width as f64, source.height as f64),
            center: (source.width as f64 / 2.0, source.height as f64 / 2.0),
            geometry: CropGeometry::default(),
            observer: None,
        };
        stage.layout();
        stage
    }

    /// Report every geometry change to `observer`.
    pub fn with_observer(mut self, observer: Option<SharedObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn source_dimensions(&self) -> Dimensions {
        self.source
    }

    /// Size of the rotated canvas the crop rectangle lives in.
    pub fn rotated_dimensions(&self) -> Dimensions {
        self.bounds
    }

    pub fn geometry(&self) -> &CropGeometry {
        &self.geometry
    }

    /// Set the zoom factor, clamped to `[1.0, 3.0]`.
    pub fn set_zoom(&mut self, zoom: f64) {
        if zoom.is_nan() {
            return;
        }
        self.geometry.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.layout();
        self.changed();
    }

    /// Set the rotation in whole degrees; any value wraps into `0..360`.
    pub fn set_rotation(&mut self, degrees: i32) {
        let rotation = normalize_rotation(degrees);
        let old = self.bounds;
        let new = rotated_bounds(self.source, rotation);

        // Keep the centre at the same relative position on the canvas.
        self.center = (
            self.center.0 / old.width as f64 * new.width as f64,
            self.center.1 / old.height as f64 * new.height as f64,
        );
        self.bounds = new;
        self.geometry.rotation = rotation;
        self.base = match self.geometry.aspect {
            AspectRatio::Free => self.shrink_to_bounds(self.requested),
            fixed => self.fit(fixed),
        };
        self.layout();
        self.changed();
    }

    /// Apply an aspect-ratio preset. Zoom and rotation are kept.
    pub fn set_aspect(&mut self, aspect: AspectRatio) {
        self.geometry.aspect = aspect;
        match aspect {
            AspectRatio::Free => self.requested = self.base,
            fixed => self.base = self.fit(fixed),
        }
        self.layout();
        self.changed();
    }

    /// Move the rectangle by `(dx, dy)` canvas pixels.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.center.0 += dx;
        self.center.1 += dy;
        self.layout();
        self.changed();
    }

    /// Resize the visible rectangle around its centre. With a fixed aspect
    /// the height follows the width.
    pub fn resize(&mut self, width: f64, height: f64) {
        self.apply_size(width, height);
        self.layout();
        self.changed();
    }

    /// Move and resize in one interaction, as a handle drag does.
    pub fn set_rect(&mut self, rect: CropRect) {
        if !rect.x.is_finite() || !rect.y.is_finite() {
            return;
        }
        self.center = rect.center();
        self.apply_size(rect.width, rect.height);
        self.layout();
        self.changed();
    }

    /// Capture the latest rectangle for the encoder.
    pub fn confirm(&self) -> CropGeometry {
        debug!("Crop confirmed: {:?}", self.geometry);
        self.geometry.clone()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn apply_size(&mut self, width: f64, height: f64) {
        if !width.is_finite() || !height.is_finite() {
            return;
        }
        let width = width.max(1.0);
        let height = match self.geometry.aspect.ratio() {
            Some(r) => width / r,
            None => height.max(1.0),
        };
        let zoom = self.geometry.zoom;
        let size = (width * zoom, height * zoom);
        if self.geometry.aspect == AspectRatio::Free {
            self.requested = size;
        }
        self.base = self.shrink_to_bounds(size);
    }

    /// Largest rectangle of `aspect` that fits the rotated bounds.
    fn fit(&self, aspect: AspectRatio) -> (f64, f64) {
        let (bw, bh) = (self.bounds.width as f64, self.bounds.height as f64);
        let (w, h) = match aspect.ratio() {
            None => (bw, bh),
            Some(r) if bw / bh > r => (bh * r, bh),
            Some(r) => (bw, bw / r),
        };
        (w.min(bw), h.min(bh))
    }

    /// Scale `size` down uniformly until it fits the rotated bounds.
    fn shrink_to_bounds(&self, size: (f64, f64)) -> (f64, f64) {
        let (bw, bh) = (self.bounds.width as f64, self.bounds.height as f64);
        let scale = (bw / size.0).min(bh / size.1).min(1.0);
        (size.0 * scale, size.1 * scale)
    }

    /// Derive the visible rectangle from base, zoom and centre.
    fn layout(&mut self) {
        let (bw, bh) = (self.bounds.width as f64, self.bounds.height as f64);
        let w = self.base.0 / self.geometry.zoom;
        let h = self.base.1 / self.geometry.zoom;
        let cx = clamp_center(self.center.0, w, bw);
        let cy = clamp_center(self.center.1, h, bh);
        self.center = (cx, cy);
        self.geometry.rect = CropRect::new(cx - w / 2.0, cy - h / 2.0, w, h);
    }

    fn changed(&self) {
        let g = &self.geometry;
        debug!(
            "Crop geometry: {:.1},{:.1} {:.1}x{:.1} zoom={:.2} rot={} aspect={}",
            g.rect.x, g.rect.y, g.rect.width, g.rect.height, g.zoom, g.rotation, g.aspect
        );
        if let Some(ref observer) = self.observer {
            observer.on_geometry_change(g);
        }
    }
}

/// Keep a span of `size` centred at `center` inside `0..extent`.
fn clamp_center(center: f64, size: f64, extent: f64) -> f64 {
    let half = size / 2.0;
    if size >= extent {
        extent / 2.0
    } else {
        center.clamp(half, extent - half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::WizardObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const EPS: f64 = 1e-9;

    fn stage(w: u32, h: u32) -> CropStage {
        CropStage::new(Dimensions::new(w, h))
    }

    fn assert_inside(stage: &CropStage) {
        let r = stage.geometry().rect;
        let b = stage.rotated_dimensions();
        assert!(r.x >= -EPS && r.y >= -EPS, "{r:?}");
        assert!(r.x + r.width <= b.width as f64 + EPS, "{r:?} in {b:?}");
        assert!(r.y + r.height <= b.height as f64 + EPS, "{r:?} in {b:?}");
    }

    #[test]
    fn starts_with_full_image() {
        let s = stage(500, 300);
        let g = s.geometry();
        assert_eq!(g.rect, CropRect::new(0.0, 0.0, 500.0, 300.0));
        assert_eq!(g.zoom, 1.0);
        assert_eq!(g.rotation, 0);
        assert_eq!(g.aspect, AspectRatio::Free);
    }

    #[test]
    fn square_preset_on_landscape_image() {
        let mut s = stage(500, 300);
        s.set_aspect(AspectRatio::SQUARE);
        assert_eq!(s.geometry().rect, CropRect::new(100.0, 0.0, 300.0, 300.0));
    }

    #[test]
    fn presets_always_match_their_ratio() {
        for &(w, h) in &[(500u32, 500u32), (1920, 1080), (300, 800), (7, 3)] {
            for rotation in [0, 17, 45, 90, 133, 270, 359] {
                for zoom in [1.0, 1.5, 3.0] {
                    for preset in AspectRatio::PRESETS.into_iter().skip(1) {
                        let mut s = stage(w, h);
                        s.set_rotation(rotation);
                        s.set_zoom(zoom);
                        s.set_aspect(preset);
                        let expected = preset.ratio().unwrap();
                        let got = s.geometry().rect.aspect();
                        assert!(
                            (got - expected).abs() < 1e-9,
                            "{w}x{h} rot={rotation} zoom={zoom} {preset}: {got}"
                        );
                        assert_inside(&s);
                    }
                }
            }
        }
    }

    #[test]
    fn preset_keeps_zoom_and_rotation() {
        let mut s = stage(800, 600);
        s.set_zoom(2.0);
        s.set_rotation(30);
        s.set_aspect(AspectRatio::WIDESCREEN);
        assert_eq!(s.geometry().zoom, 2.0);
        assert_eq!(s.geometry().rotation, 30);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut s = stage(100, 100);
        s.set_zoom(0.2);
        assert_eq!(s.geometry().zoom, 1.0);
        s.set_zoom(9.0);
        assert_eq!(s.geometry().zoom, 3.0);
        s.set_zoom(f64::NAN);
        assert_eq!(s.geometry().zoom, 3.0);
    }

    #[test]
    fn zoom_shrinks_rect_around_centre() {
        let mut s = stage(500, 500);
        s.set_aspect(AspectRatio::SQUARE);
        s.set_zoom(1.5);
        let r = s.geometry().rect;
        assert!((r.width - 500.0 / 1.5).abs() < EPS);
        assert!((r.height - 500.0 / 1.5).abs() < EPS);
        let (cx, cy) = r.center();
        assert!((cx - 250.0).abs() < EPS && (cy - 250.0).abs() < EPS);
    }

    #[test]
    fn rotation_wraps() {
        let mut s = stage(400, 200);
        s.set_rotation(360);
        assert_eq!(s.geometry().rotation, 0);
        assert_eq!(s.geometry().rect, stage(400, 200).geometry().rect);
        s.set_rotation(-90);
        assert_eq!(s.geometry().rotation, 270);
        s.set_rotation(725);
        assert_eq!(s.geometry().rotation, 5);
    }

    #[test]
    fn rotation_360_equals_rotation_0() {
        let mut a = stage(640, 480);
        let mut b = stage(640, 480);
        a.set_aspect(AspectRatio::STANDARD);
        b.set_aspect(AspectRatio::STANDARD);
        a.set_zoom(1.7);
        b.set_zoom(1.7);
        a.set_rotation(0);
        b.set_rotation(360);
        assert_eq!(a.geometry(), b.geometry());
    }

    #[test]
    fn free_crop_recovers_after_rotating_back() {
        let mut s = stage(400, 200);
        s.set_rotation(90);
        assert_inside(&s);
        s.set_rotation(360);
        assert_eq!(s.geometry(), stage(400, 200).geometry());

        s.set_rotation(45);
        s.set_rotation(0);
        assert_eq!(s.geometry().rect, CropRect::new(0.0, 0.0, 400.0, 200.0));
    }

    #[test]
    fn free_resize_survives_rotation_round_trip() {
        let mut s = stage(400, 200);
        s.resize(300.0, 150.0);
        let before = s.geometry().rect;
        s.set_rotation(90);
        s.set_rotation(0);
        let after = s.geometry().rect;
        assert!((after.width - before.width).abs() < EPS, "{after:?}");
        assert!((after.height - before.height).abs() < EPS, "{after:?}");
    }

    #[test]
    fn non_finite_rect_is_ignored() {
        let mut s = stage(200, 100);
        s.set_zoom(2.0);
        let before = s.geometry().rect;
        s.set_rect(CropRect::new(f64::NAN, 10.0, 50.0, 20.0));
        assert_eq!(s.geometry().rect, before);
        s.pan(5.0, 0.0);
        let r = s.geometry().rect;
        assert!(r.x.is_finite() && r.y.is_finite(), "{r:?}");
    }

    #[test]
    fn quarter_turn_swaps_bounds() {
        let mut s = stage(400, 200);
        s.set_rotation(90);
        assert_eq!(s.rotated_dimensions(), Dimensions::new(200, 400));
        assert_inside(&s);
    }

    #[test]
    fn rotated_bounds_grow_for_oblique_angles() {
        let b = rotated_bounds(Dimensions::new(100, 100), 45);
        assert_eq!(b, Dimensions::new(141, 141));
        assert_eq!(rotated_bounds(Dimensions::new(30, 10), 180), Dimensions::new(30, 10));
    }

    #[test]
    fn pan_is_clamped_to_bounds() {
        let mut s = stage(300, 300);
        s.set_zoom(2.0);
        s.pan(10_000.0, -10_000.0);
        let r = s.geometry().rect;
        assert!((r.x - 150.0).abs() < EPS, "{r:?}");
        assert!(r.y.abs() < EPS, "{r:?}");
        s.pan(f64::INFINITY, 0.0);
        assert_eq!(s.geometry().rect, r);
    }

    #[test]
    fn resize_respects_locked_ratio() {
        let mut s = stage(1000, 1000);
        s.set_aspect(AspectRatio::CLASSIC);
        s.resize(300.0, 999.0);
        let r = s.geometry().rect;
        assert!((r.width - 300.0).abs() < EPS);
        assert!((r.aspect() - 1.5).abs() < EPS);
    }

    #[test]
    fn free_resize_is_limited_to_bounds() {
        let mut s = stage(200, 100);
        s.set_rect(CropRect::new(10.0, 10.0, 50.0, 20.0));
        assert_eq!(s.geometry().rect, CropRect::new(10.0, 10.0, 50.0, 20.0));
        s.resize(5_000.0, 100.0);
        let r = s.geometry().rect;
        assert!(r.width <= 200.0 + EPS && r.height <= 100.0 + EPS, "{r:?}");
        assert_inside(&s);
    }

    #[test]
    fn to_pixels_full_and_empty() {
        let full = CropRect::new(0.0, 0.0, 640.0, 480.0);
        assert_eq!(full.to_pixels(Dimensions::new(640, 480)), Some((0, 0, 640, 480)));
        let sliver = CropRect::new(10.0, 10.0, 0.2, 50.0);
        assert_eq!(sliver.to_pixels(Dimensions::new(640, 480)), None);
        let outside = CropRect::new(700.0, 0.0, 50.0, 50.0);
        assert_eq!(outside.to_pixels(Dimensions::new(640, 480)), None);
        let nan = CropRect::new(f64::NAN, 0.0, 50.0, 50.0);
        assert_eq!(nan.to_pixels(Dimensions::new(640, 480)), None);
    }

    #[test]
    fn to_pixels_size_does_not_depend_on_position() {
        let bounds = Dimensions::new(500, 500);
        for i in 0..40 {
            let x = 83.0 + i as f64 * 0.1;
            let r = CropRect::new(x, 83.333_333, 333.333_333, 333.333_333);
            let (_, _, w, h) = r.to_pixels(bounds).unwrap();
            assert_eq!((w, h), (333, 333), "x={x}");
        }
    }

    #[test]
    fn to_pixels_keeps_span_inside_bounds() {
        let r = CropRect::new(166.7, 0.0, 333.4, 100.0);
        assert_eq!(r.to_pixels(Dimensions::new(500, 100)), Some((167, 0, 333, 100)));
        let r = CropRect::new(-0.4, 0.0, 10.6, 10.0);
        assert_eq!(r.to_pixels(Dimensions::new(20, 20)), Some((0, 0, 11, 10)));
    }

    #[test]
    fn panned_square_snaps_to_square_pixels() {
        let mut s = stage(500, 500);
        s.set_aspect(AspectRatio::SQUARE);
        s.set_zoom(1.5);
        for dx in [0.3, 0.2, -0.45, 0.15, 0.35] {
            s.pan(dx, dx / 3.0);
            let (_, _, w, h) = s.geometry().rect.to_pixels(s.rotated_dimensions()).unwrap();
            assert_eq!(w, h, "{:?}", s.geometry().rect);
        }
    }

    #[derive(Default)]
    struct CountGeometry(AtomicUsize);

    impl WizardObserver for CountGeometry {
        fn on_geometry_change(&self, _geometry: &CropGeometry) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn every_interaction_notifies() {
        let counter = Arc::new(CountGeometry::default());
        let mut s = stage(100, 100).with_observer(Some(counter.clone() as SharedObserver));
        s.pan(1.0, 1.0);
        s.set_zoom(1.2);
        s.set_rotation(10);
        s.set_aspect(AspectRatio::SQUARE);
        s.resize(20.0, 20.0);
        s.set_rect(CropRect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(counter.0.load(Ordering::SeqCst), 6);
    }
}
