use crate::foundation::core::{Rect, Viewport, non_empty, rects_overlap};

/// Why the whole frame is considered damaged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FullFrameReason {
    /// A visual was attached, detached, or reparented.
    StructureChanged,
    /// The viewport size changed.
    ViewportResized,
    /// The render device was recreated.
    DeviceChanged,
    /// Neither old nor new bounds of a change were known.
    UnknownBounds,
    /// An invalidation arrived without an originating visual.
    Unattributed,
    /// Too many disjoint regions to be worth drawing one by one.
    Fragmented,
    /// The regions already cover most of the viewport.
    CoverageThreshold,
    /// The embedder asked for a full repaint.
    Requested,
    /// A draw failed part-way through a full-frame pass.
    DrawFailed,
}

/// Tuning for [`DirtyRegionTracker`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirtyRegionOpts {
    /// Collapse to full-frame once more disjoint regions than this accumulate.
    pub max_regions: usize,
    /// Collapse to full-frame once the regions cover more than this fraction of the viewport.
    pub full_frame_coverage_threshold: f64,
}

impl Default for DirtyRegionOpts {
    fn default() -> Self {
        Self {
            max_regions: 16,
            full_frame_coverage_threshold: 0.75,
        }
    }
}

/// Root-space damage accumulated since the last successful draw.
///
/// Stored regions are pairwise non-overlapping: every insert merges with overlapping regions into
/// their bounding union until no overlap remains.
#[derive(Debug, Clone)]
pub struct DirtyRegionTracker {
    opts: DirtyRegionOpts,
    viewport: Viewport,
    regions: Vec<Rect>,
    full_frame: bool,
    full_frame_reason: Option<FullFrameReason>,
}

impl DirtyRegionTracker {
    /// Empty tracker for `viewport`.
    pub fn new(viewport: Viewport, opts: DirtyRegionOpts) -> Self {
        Self {
            opts,
            viewport,
            regions: Vec::new(),
            full_frame: false,
            full_frame_reason: None,
        }
    }

    /// Viewport the regions are measured against.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Tuning in effect.
    pub fn opts(&self) -> DirtyRegionOpts {
        self.opts
    }

    /// Replace the tuning; takes effect on the next insert.
    pub fn set_opts(&mut self, opts: DirtyRegionOpts) {
        self.opts = opts;
    }

    /// Resynchronize the coordinate space. Any size change damages the whole frame.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport == self.viewport {
            return;
        }
        let resized =
            viewport.width != self.viewport.width || viewport.height != self.viewport.height;
        let reason = if resized {
            FullFrameReason::ViewportResized
        } else {
            FullFrameReason::DeviceChanged
        };
        self.viewport = viewport;
        self.mark_full_frame_dirty(reason);
    }

    /// Union `rect` into the damaged area.
    pub fn add_dirty_region(&mut self, rect: Rect) {
        if self.full_frame {
            return;
        }
        let Some(mut merged) = non_empty(rect) else {
            return;
        };

        loop {
            let before = self.regions.len();
            self.regions.retain(|r| {
                if rects_overlap(*r, merged) {
                    merged = merged.union(*r);
                    false
                } else {
                    true
                }
            });
            if self.regions.len() == before {
                break;
            }
        }
        self.regions.push(merged);

        if self.regions.len() > self.opts.max_regions {
            self.mark_full_frame_dirty(FullFrameReason::Fragmented);
        } else if self.dirty_area_coverage() > self.opts.full_frame_coverage_threshold {
            self.mark_full_frame_dirty(FullFrameReason::CoverageThreshold);
        }
    }

    /// Damage for a bounds change: both sides are unioned in; if neither is known the whole
    /// frame is damaged.
    pub fn add_bounds_change(&mut self, old: Option<Rect>, new: Option<Rect>) {
        match (old, new) {
            (None, None) => self.mark_full_frame_dirty(FullFrameReason::UnknownBounds),
            (old, new) => {
                if let Some(r) = old {
                    self.add_dirty_region(r);
                }
                if let Some(r) = new {
                    self.add_dirty_region(r);
                }
            }
        }
    }

    /// Discard the region list; the whole viewport is damaged until [`Self::clear`].
    pub fn mark_full_frame_dirty(&mut self, reason: FullFrameReason) {
        if !self.full_frame {
            tracing::debug!(
                ?reason,
                regions = self.regions.len(),
                "dirty set collapsed to full frame"
            );
            self.full_frame_reason = Some(reason);
        }
        self.full_frame = true;
        self.regions.clear();
    }

    /// Reset to "nothing damaged".
    pub fn clear(&mut self) {
        self.regions.clear();
        self.full_frame = false;
        self.full_frame_reason = None;
    }

    /// Whether the whole viewport is damaged.
    pub fn is_full_frame_dirty(&self) -> bool {
        self.full_frame
    }

    /// The first reason the frame went full-frame dirty.
    pub fn full_frame_reason(&self) -> Option<FullFrameReason> {
        self.full_frame_reason
    }

    /// Whether anything is damaged.
    pub fn is_dirty(&self) -> bool {
        self.full_frame || !self.regions.is_empty()
    }

    /// Number of stored (merged) regions; 0 when full-frame dirty.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Stored regions. Ignored by drawing when full-frame dirty.
    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    /// Fraction of the viewport covered by damage, in `[0, 1]`.
    pub fn dirty_area_coverage(&self) -> f64 {
        if self.full_frame {
            return 1.0;
        }
        let total = self.viewport.area();
        if total <= 0.0 {
            return 0.0;
        }
        let vp = self.viewport.rect();
        let covered: f64 = self
            .regions
            .iter()
            .map(|r| r.intersect(vp).area())
            .sum();
        (covered / total).min(1.0)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/damage/tracker.rs"]
mod tests;
