//! Render stage: rotate the source, then cut out the crop rectangle.
//!
//! The order is fixed: the whole source is first drawn rotated about its
//! centre onto a transparent canvas the size of the rotated bounding box,
//! and only then is the axis-aligned crop rectangle copied out of that
//! canvas. The crop stage shows the user exactly this composition, so the
//! output matches the preview pixel for pixel.
//!
//! Quarter turns are exact pixel permutations. Any other angle goes through
//! an `imageproc` projective warp with bilinear sampling; canvas pixels that
//! fall outside the source stay transparent.

use crate::error::EncodeError;
use crate::pipeline::geometry::{rotated_bounds, CropGeometry};
use crate::pipeline::select::Dimensions;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::debug;

/// Decode the source bytes into pixels.
pub fn decode_source(bytes: &[u8]) -> Result<DynamicImage, EncodeError> {
    image::load_from_memory(bytes).map_err(|e| EncodeError::Decode {
        detail: e.to_string(),
    })
}

/// Produce the cropped, rotated output raster for `geometry`.
pub fn render_crop(image: &DynamicImage, geometry: &CropGeometry) -> Result<RgbaImage, EncodeError> {
    let source = Dimensions::new(image.width(), image.height());
    let canvas = rotate_onto_canvas(image, geometry.rotation);
    let bounds = Dimensions::new(canvas.width(), canvas.height());
    debug_assert_eq!(bounds, rotated_bounds(source, geometry.rotation));

    let (x, y, w, h) = geometry
        .rect
        .to_pixels(bounds)
        .ok_or(EncodeError::EmptyCrop {
            width: geometry.rect.width.max(0.0).round() as u32,
            height: geometry.rect.height.max(0.0).round() as u32,
        })?;

    debug!(
        "Rendering {}x{} crop at {},{} from {}x{} canvas (rotation {}°)",
        w, h, x, y, bounds.width, bounds.height, geometry.rotation
    );

    Ok(canvas.view(x, y, w, h).to_image())
}

/// Draw `image` rotated clockwise by `rotation` degrees about its centre.
pub fn rotate_onto_canvas(image: &DynamicImage, rotation: u16) -> RgbaImage {
    match rotation % 360 {
        0 => image.to_rgba8(),
        90 => image.rotate90().to_rgba8(),
        180 => image.rotate180().to_rgba8(),
        270 => image.rotate270().to_rgba8(),
        r => rotate_arbitrary(&image.to_rgba8(), r),
    }
}

fn rotate_arbitrary(src: &RgbaImage, rotation: u16) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    let bounds = rotated_bounds(Dimensions::new(sw, sh), rotation);
    let mut canvas = RgbaImage::new(bounds.width, bounds.height);

    // Source centre onto the origin, rotate clockwise, then onto the canvas centre.
    let (scx, scy) = ((sw as f32 - 1.0) / 2.0, (sh as f32 - 1.0) / 2.0);
    let (dcx, dcy) = ((bounds.width as f32 - 1.0) / 2.0, (bounds.height as f32 - 1.0) / 2.0);
    let projection = Projection::translate(dcx, dcy)
        * Projection::rotate((rotation as f32).to_radians())
        * Projection::translate(-scx, -scy);

    warp_into(
        src,
        &projection,
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
        &mut canvas,
    );
    canvas
}
