//! Pipeline stages of the image acquisition wizard.
//!
//! Each submodule implements exactly one step. The wizard only sequences
//! them; every stage can be used and tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! select ──▶ geometry ──▶ render ──▶ encode ──▶ upload
//! (file)     (crop UI)    (pixels)   (blob)     (collaborator)
//! ```
//!
//! 1. [`select`]   — validate type and size, probe dimensions, register an
//!    object URL for the source bytes
//! 2. [`geometry`] — crop/zoom/rotate state; produces the crop rectangle in
//!    rotated-image pixel space
//! 3. [`render`]   — rotate the decoded source onto a canvas, then cut out
//!    the rectangle; CPU-bound, so the wizard runs it in `spawn_blocking`
//! 4. [`encode`]   — serialise to JPEG/PNG/WebP with a one-shot fallback
//! 5. [`upload`]   — hand the artifact to the injected collaborator; the
//!    only stage with network I/O

pub mod encode;
pub mod geometry;
pub mod render;
pub mod select;
pub mod upload;
