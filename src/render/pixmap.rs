use kurbo::{BezPath, Shape};

use crate::foundation::core::{Affine, Point, Rect, Rgba8Premul};
use crate::foundation::error::{OverpaintError, OverpaintResult};
use crate::render::blend::{lerp, over, over_row, scale};
use crate::render::surface::{BatchState, BlendMode, DrawSurface, RenderTarget};

/// Default maximum offscreen dimension for [`PixmapSurface`].
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 4096;

/// Counters collected by a [`PixmapSurface`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PixmapSurfaceStats {
    /// Batches opened.
    pub batches: u64,
    /// `fill_rect` calls that touched at least one pixel.
    pub fills: u64,
    /// Rasterizer passes composited into the pixmap.
    pub flushes: u64,
    /// `clear` calls.
    pub clears: u64,
    /// `blit` calls.
    pub blits: u64,
    /// Deepest clip/transform stack observed.
    pub max_state_depth: usize,
}

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelSpan {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelSpan {
    fn full(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// Device-space rectangle to pixels; edges round to the nearest pixel boundary so adjacent
    /// rectangles tile without gaps or double coverage.
    fn from_device_rect(rect: Rect, width: u32, height: u32) -> Self {
        fn edge(v: f64, max: u32) -> u32 {
            let v = v.round();
            if v.is_nan() || v <= 0.0 {
                0
            } else if v >= f64::from(max) {
                max
            } else {
                v as u32
            }
        }
        let r = rect.abs();
        Self {
            x0: edge(r.x0, width),
            y0: edge(r.y0, height),
            x1: edge(r.x1, width),
            y1: edge(r.y1, height),
        }
    }

    /// Smallest pixel rectangle touched by `rect`, for antialiased coverage.
    fn covering(rect: Rect, width: u32, height: u32) -> Self {
        let r = rect.abs();
        Self::from_device_rect(
            Rect::new(r.x0.floor(), r.y0.floor(), r.x1.ceil(), r.y1.ceil()),
            width,
            height,
        )
    }

    fn to_rect(self) -> Rect {
        Rect::new(
            f64::from(self.x0),
            f64::from(self.y0),
            f64::from(self.x1),
            f64::from(self.y1),
        )
    }

    fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    fn width(self) -> usize {
        (self.x1 - self.x0) as usize
    }

    fn intersect(self, other: Self) -> Self {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        Self {
            x0,
            y0,
            x1: self.x1.min(other.x1).max(x0),
            y1: self.y1.min(other.y1).max(y0),
        }
    }

    fn is_empty(self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateKind {
    Clip,
    Transform,
}

#[derive(Debug, Clone, Copy)]
struct SavedState {
    kind: StateKind,
    transform: Affine,
    clip: PixelSpan,
    clip_paths: usize,
}

/// `vello_cpu` context plus the scratch pixmap it renders into before compositing.
struct Raster {
    ctx: vello_cpu::RenderContext,
    scratch: vello_cpu::Pixmap,
}

impl Raster {
    fn new(width: u16, height: u16) -> Self {
        Self {
            ctx: vello_cpu::RenderContext::new(width, height),
            scratch: vello_cpu::Pixmap::new(width, height),
        }
    }

    /// Rasterize everything recorded since the last call into `scratch` and reset the context.
    fn render(&mut self) {
        self.ctx.flush();
        self.ctx.render_to_pixmap(&mut self.scratch);
        self.ctx.reset();
    }

    fn push_clips(&mut self, span: Option<Rect>, paths: &[BezPath]) {
        self.ctx.set_transform(Affine::IDENTITY);
        if let Some(rect) = span {
            self.ctx.push_clip_layer(&rect.to_path(0.1));
        }
        for path in paths {
            self.ctx.push_clip_layer(path);
        }
    }

    fn pop_clips(&mut self, span: Option<Rect>, paths: &[BezPath]) {
        for _ in 0..paths.len() + usize::from(span.is_some()) {
            self.ctx.pop_layer();
        }
    }
}

/// CPU render target backed by a `vello_cpu` pixmap (premultiplied RGBA8, row-major).
///
/// Fills are recorded into a `vello_cpu::RenderContext` and composited source-over into the pixmap
/// when the surface settles (end of batch, or after a draw outside any batch and state). Clips that
/// are not whole-pixel axis-aligned rectangles are applied as `vello_cpu` clip layers. `clear`,
/// `blit` and copy-mode fills work on pixmap bytes, weighted by a rasterized clip coverage mask
/// when such a clip is active. Misuse of the state stack (nested batches, unbalanced pops,
/// mismatched pop kinds) panics.
pub struct PixmapSurface {
    pixmap: vello_cpu::Pixmap,
    width: u32,
    height: u32,
    max_texture_dimension: u32,
    transform: Affine,
    clip: PixelSpan,
    clip_paths: Vec<BezPath>,
    stack: Vec<SavedState>,
    batch: Option<BatchState>,
    raster: Option<Raster>,
    pending: Option<PixelSpan>,
    stats: PixmapSurfaceStats,
}

impl std::fmt::Debug for PixmapSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixmapSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("state_depth", &self.stack.len())
            .field("batch", &self.batch)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl PixmapSurface {
    /// Allocate a transparent surface.
    pub fn new(width: u32, height: u32) -> OverpaintResult<Self> {
        Self::with_max_texture_dimension(width, height, DEFAULT_MAX_TEXTURE_DIMENSION)
    }

    /// Allocate a transparent surface whose offscreens are limited to `max_texture_dimension`.
    pub fn with_max_texture_dimension(
        width: u32,
        height: u32,
        max_texture_dimension: u32,
    ) -> OverpaintResult<Self> {
        if width == 0 || height == 0 {
            return Err(OverpaintError::surface(format!(
                "surface size must be non-zero, got {width}x{height}"
            )));
        }
        let w: u16 = width
            .try_into()
            .map_err(|_| OverpaintError::surface(format!("surface width exceeds u16: {width}")))?;
        let h: u16 = height.try_into().map_err(|_| {
            OverpaintError::surface(format!("surface height exceeds u16: {height}"))
        })?;
        Ok(Self {
            pixmap: vello_cpu::Pixmap::new(w, h),
            width,
            height,
            max_texture_dimension: max_texture_dimension.min(u32::from(u16::MAX)),
            transform: Affine::IDENTITY,
            clip: PixelSpan::full(width, height),
            clip_paths: Vec::new(),
            stack: Vec::new(),
            batch: None,
            raster: None,
            pending: None,
            stats: PixmapSurfaceStats::default(),
        })
    }

    /// Number of clip/transform states currently pushed.
    pub fn state_depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether a batch is open.
    pub fn is_batch_open(&self) -> bool {
        self.batch.is_some()
    }

    /// Counters since creation.
    pub fn stats(&self) -> PixmapSurfaceStats {
        self.stats
    }

    /// Read one composited pixel. Fills still pending inside an open batch are not visible yet.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8Premul> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let d = self.pixmap.data_as_u8_slice();
        Some(Rgba8Premul::from_array([d[i], d[i + 1], d[i + 2], d[i + 3]]))
    }

    /// Premultiplied RGBA8 bytes, tightly packed, row-major.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data_as_u8_slice()
    }

    fn push_state(&mut self, kind: StateKind) {
        self.stack.push(SavedState {
            kind,
            transform: self.transform,
            clip: self.clip,
            clip_paths: self.clip_paths.len(),
        });
        self.stats.max_state_depth = self.stats.max_state_depth.max(self.stack.len());
    }

    fn pop_state(&mut self, kind: StateKind) {
        let Some(saved) = self.stack.pop() else {
            panic!("pop_{kind:?} without matching push");
        };
        assert_eq!(saved.kind, kind, "state stack popped out of order");
        self.transform = saved.transform;
        self.clip = saved.clip;
        self.clip_paths.truncate(saved.clip_paths);
        self.settle();
    }

    fn blend_mode(&self) -> BlendMode {
        self.batch.map(|b| b.blend).unwrap_or_default()
    }

    /// Span clip layer, needed only when some clip must be rasterized anyway.
    fn span_clip(&self) -> Option<Rect> {
        (self.clip != PixelSpan::full(self.width, self.height)).then(|| self.clip.to_rect())
    }

    fn raster(raster: &mut Option<Raster>, width: u32, height: u32) -> &mut Raster {
        raster.get_or_insert_with(|| Raster::new(width as u16, height as u16))
    }

    /// Composite pending fills once nothing can add to them any more.
    fn settle(&mut self) {
        if self.batch.is_none() && self.stack.is_empty() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let Some(span) = self.pending.take() else {
            return;
        };
        let Some(raster) = self.raster.as_mut() else {
            return;
        };
        raster.render();
        self.stats.flushes += 1;
        let src = raster.scratch.data_as_u8_slice();
        let dst = self.pixmap.data_as_u8_slice_mut();
        for y in span.y0..span.y1 {
            let range = row_range(self.width, y, span.x0, span.x1);
            over_row(&mut dst[range.clone()], &src[range]);
        }
    }

    /// Per-pixel coverage over `area` of `shape` (or the whole area) under the current clip.
    fn coverage(&mut self, shape: Option<(Affine, Rect)>, area: PixelSpan) -> Vec<u8> {
        let span = self.span_clip();
        let raster = Self::raster(&mut self.raster, self.width, self.height);
        raster.push_clips(span, &self.clip_paths);
        raster
            .ctx
            .set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 255));
        match shape {
            Some((transform, rect)) => {
                raster.ctx.set_transform(transform);
                raster.ctx.fill_rect(&rect);
            }
            None => raster.ctx.fill_rect(&area.to_rect()),
        }
        raster.pop_clips(span, &self.clip_paths);
        raster.render();

        let alpha = raster.scratch.data_as_u8_slice();
        let mut out = Vec::with_capacity(area.width() * (area.y1 - area.y0) as usize);
        for y in area.y0..area.y1 {
            let range = row_range(self.width, y, area.x0, area.x1);
            out.extend(alpha[range].chunks_exact(4).map(|px| px[3]));
        }
        out
    }

    /// Rewrite every pixel of `area` with `f(dst, coverage)`.
    fn apply_masked(
        &mut self,
        area: PixelSpan,
        mask: Option<&[u8]>,
        mut f: impl FnMut(u32, u32, [u8; 4], u8) -> [u8; 4],
    ) {
        let width = area.width();
        let data = self.pixmap.data_as_u8_slice_mut();
        for (row, y) in (area.y0..area.y1).enumerate() {
            let range = row_range(self.width, y, area.x0, area.x1);
            for (col, d) in data[range].chunks_exact_mut(4).enumerate() {
                let cov = mask.map_or(255, |m| m[row * width + col]);
                let out = f(area.x0 + col as u32, y, [d[0], d[1], d[2], d[3]], cov);
                d.copy_from_slice(&out);
            }
        }
    }

    fn fill_copy(&mut self, rect: Rect, px: [u8; 4], area: PixelSpan) {
        let device = self.transform.transform_rect_bbox(rect);
        let exact = self.clip_paths.is_empty()
            && is_axis_aligned(self.transform)
            && is_pixel_aligned(device);
        let mask = (!exact).then(|| self.coverage(Some((self.transform, rect)), area));
        self.apply_masked(area, mask.as_deref(), |_, _, d, cov| lerp(d, px, cov));
    }

    fn fill_over(&mut self, rect: Rect, color: Rgba8Premul, area: PixelSpan) {
        let Some(paint) = straight_color(color) else {
            return;
        };
        let fast = self.clip_paths.is_empty() && is_axis_aligned(self.transform);
        let span = self.span_clip();
        let clip_rect = self.clip.to_rect();
        let raster = Self::raster(&mut self.raster, self.width, self.height);
        raster.ctx.set_paint(paint);
        if fast {
            raster.ctx.set_transform(Affine::IDENTITY);
            let device = self.transform.transform_rect_bbox(rect).intersect(clip_rect);
            raster.ctx.fill_rect(&device);
        } else {
            raster.push_clips(span, &self.clip_paths);
            raster.ctx.set_transform(self.transform);
            raster.ctx.fill_rect(&rect);
            raster.pop_clips(span, &self.clip_paths);
        }
        self.pending = Some(self.pending.map_or(area, |p| p.union(area)));
    }
}

fn row_range(width: u32, y: u32, x0: u32, x1: u32) -> std::ops::Range<usize> {
    let row = (y as usize) * (width as usize);
    (row + x0 as usize) * 4..(row + x1 as usize) * 4
}

/// Maps axis-aligned rectangles to axis-aligned rectangles.
fn is_axis_aligned(t: Affine) -> bool {
    let [a, b, c, d, _, _] = t.as_coeffs();
    (b == 0.0 && c == 0.0) || (a == 0.0 && d == 0.0)
}

fn is_pixel_aligned(r: Rect) -> bool {
    let whole = |v: f64| (v - v.round()).abs() < 1e-9;
    whole(r.x0) && whole(r.y0) && whole(r.x1) && whole(r.y1)
}

/// `vello_cpu` paints take straight alpha; fully transparent paints draw nothing.
fn straight_color(c: Rgba8Premul) -> Option<vello_cpu::peniko::Color> {
    if c.a == 0 {
        return None;
    }
    let unpremul = |v: u8| -> u8 {
        ((u32::from(v) * 255 + u32::from(c.a) / 2) / u32::from(c.a)).min(255) as u8
    };
    Some(vello_cpu::peniko::Color::from_rgba8(
        unpremul(c.r),
        unpremul(c.g),
        unpremul(c.b),
        c.a,
    ))
}

impl DrawSurface for PixmapSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_batch(&mut self, state: BatchState) {
        assert!(self.batch.is_none(), "begin_batch while a batch is open");
        self.batch = Some(state);
        self.stats.batches += 1;
    }

    fn end_batch(&mut self) {
        assert!(self.batch.is_some(), "end_batch without an open batch");
        self.batch = None;
        self.flush();
    }

    fn push_clip(&mut self, rect: Rect) {
        self.push_state(StateKind::Clip);
        let device = self.transform.transform_rect_bbox(rect);
        if is_axis_aligned(self.transform) && is_pixel_aligned(device) {
            let span = PixelSpan::from_device_rect(device, self.width, self.height);
            self.clip = self.clip.intersect(span);
        } else {
            let span = PixelSpan::covering(device, self.width, self.height);
            self.clip = self.clip.intersect(span);
            self.clip_paths.push(self.transform * rect.to_path(0.1));
        }
    }

    fn pop_clip(&mut self) {
        self.pop_state(StateKind::Clip);
    }

    fn push_transform(&mut self, transform: Affine) {
        self.push_state(StateKind::Transform);
        self.transform = self.transform * transform;
    }

    fn pop_transform(&mut self) {
        self.pop_state(StateKind::Transform);
    }

    fn clear(&mut self, color: Rgba8Premul) {
        self.stats.clears += 1;
        self.flush();
        let area = self.clip;
        if area.is_empty() {
            return;
        }
        let px = color.to_array();
        if self.clip_paths.is_empty() {
            let data = self.pixmap.data_as_u8_slice_mut();
            for y in area.y0..area.y1 {
                for d in data[row_range(self.width, y, area.x0, area.x1)].chunks_exact_mut(4) {
                    d.copy_from_slice(&px);
                }
            }
        } else {
            let mask = self.coverage(None, area);
            self.apply_masked(area, Some(&mask), |_, _, d, cov| lerp(d, px, cov));
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba8Premul) {
        let device = self.transform.transform_rect_bbox(rect);
        let area = PixelSpan::covering(device, self.width, self.height).intersect(self.clip);
        if area.is_empty() {
            return;
        }
        self.stats.fills += 1;
        match self.blend_mode() {
            BlendMode::SourceOver => self.fill_over(rect, color, area),
            BlendMode::Copy => {
                self.flush();
                self.fill_copy(rect, color.to_array(), area);
            }
        }
        self.settle();
    }
}

impl RenderTarget for PixmapSurface {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_offscreen(&self, width: u32, height: u32) -> OverpaintResult<Self> {
        if width > self.max_texture_dimension || height > self.max_texture_dimension {
            return Err(OverpaintError::surface(format!(
                "offscreen {width}x{height} exceeds max texture dimension {}",
                self.max_texture_dimension
            )));
        }
        Self::with_max_texture_dimension(width, height, self.max_texture_dimension)
    }

    fn blit(&mut self, src: &Self, origin: Point) {
        debug_assert!(src.pending.is_none(), "blit from a surface with pending fills");
        self.stats.blits += 1;
        self.flush();
        let ox = origin.x.round() as i64;
        let oy = origin.y.round() as i64;

        let clamp = |v: i64, max: u32| v.clamp(0, i64::from(max)) as u32;
        let dst = PixelSpan {
            x0: clamp(ox, self.width),
            y0: clamp(oy, self.height),
            x1: clamp(ox + i64::from(src.width), self.width),
            y1: clamp(oy + i64::from(src.height), self.height),
        }
        .intersect(self.clip);
        if dst.is_empty() {
            return;
        }

        let mode = self.blend_mode();
        let sx0 = (i64::from(dst.x0) - ox) as u32;
        let sx1 = (i64::from(dst.x1) - ox) as u32;
        if self.clip_paths.is_empty() {
            for y in dst.y0..dst.y1 {
                let sy = (i64::from(y) - oy) as u32;
                let src_row = &src.pixmap.data_as_u8_slice()[row_range(src.width, sy, sx0, sx1)];
                let range = row_range(self.width, y, dst.x0, dst.x1);
                let dst_row = &mut self.pixmap.data_as_u8_slice_mut()[range];
                match mode {
                    BlendMode::SourceOver => over_row(dst_row, src_row),
                    BlendMode::Copy => dst_row.copy_from_slice(src_row),
                }
            }
            return;
        }

        let mask = self.coverage(None, dst);
        let src_data = src.pixmap.data_as_u8_slice();
        self.apply_masked(dst, Some(&mask), |x, y, d, cov| {
            let sx = (i64::from(x) - ox) as u32;
            let sy = (i64::from(y) - oy) as u32;
            let i = row_range(src.width, sy, sx, sx + 1);
            let s = &src_data[i];
            let s = [s[0], s[1], s[2], s[3]];
            match mode {
                BlendMode::SourceOver => over(d, scale(s, cov)),
                BlendMode::Copy => lerp(d, s, cov),
            }
        });
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/pixmap.rs"]
mod tests;
