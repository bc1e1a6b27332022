use crate::foundation::core::{Affine, Point, Rect, Rgba8Premul};
use crate::foundation::error::OverpaintResult;

/// How fills and blits combine with existing pixels inside a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlendMode {
    /// Porter-Duff source-over on premultiplied pixels.
    #[default]
    SourceOver,
    /// Replace destination pixels.
    Copy,
}

/// Texture sampling used when a backend scales cached surfaces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Sampler {
    /// Nearest texel; exact for integer-aligned blits.
    #[default]
    Nearest,
    /// Bilinear filtering.
    Linear,
}

/// Pipeline state a batch is opened with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BatchState {
    /// Blend mode for every draw in the batch.
    pub blend: BlendMode,
    /// Sampler for every blit in the batch.
    pub sampler: Sampler,
}

/// Drawing API handed to visuals.
///
/// Clip and transform state is a stack: every `push_*` must be matched by the corresponding
/// `pop_*` in LIFO order. Clip rectangles are interpreted in the coordinate space of the current
/// transform.
pub trait DrawSurface {
    /// Pixel size of the surface.
    fn size(&self) -> (u32, u32);

    /// Open a batch. Batches do not nest.
    fn begin_batch(&mut self, state: BatchState);

    /// Close the open batch.
    fn end_batch(&mut self);

    /// Intersect the current clip with `rect`.
    fn push_clip(&mut self, rect: Rect);

    /// Restore the clip that was active before the matching `push_clip`.
    fn pop_clip(&mut self);

    /// Pre-multiply `transform` onto the current transform.
    fn push_transform(&mut self, transform: Affine);

    /// Restore the transform that was active before the matching `push_transform`.
    fn pop_transform(&mut self);

    /// Replace every pixel inside the current clip with `color`.
    fn clear(&mut self, color: Rgba8Premul);

    /// Fill `rect` (in current transform space) with `color`.
    fn fill_rect(&mut self, rect: Rect, color: Rgba8Premul);
}

/// A surface the compositor can draw frames into and allocate render caches from.
pub trait RenderTarget: DrawSurface + Sized {
    /// Largest width or height an offscreen surface may have.
    fn max_texture_dimension(&self) -> u32;

    /// Allocate a transparent offscreen surface compatible with `self`.
    fn create_offscreen(&self, width: u32, height: u32) -> OverpaintResult<Self>;

    /// Composite `src` with its top-left corner at `origin` in device pixels.
    ///
    /// The current transform is ignored; the current clip applies.
    fn blit(&mut self, src: &Self, origin: Point);
}
