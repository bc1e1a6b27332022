use crate::cache::policy::CachePolicyOpts;
use crate::damage::tracker::DirtyRegionOpts;
use crate::foundation::core::Rgba8Premul;
use crate::foundation::error::{OverpaintError, OverpaintResult};

/// Options controlling [`crate::Compositor`] behavior.
///
/// Every field has a default, so partial JSON documents are accepted by
/// [`CompositorOpts::from_json_str`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CompositorOpts {
    /// Use offscreen render caches for expensive subtrees.
    pub enable_caching: bool,
    /// Redraw only damaged regions when the damage is small enough.
    pub enable_dirty_region_drawing: bool,
    /// Skip ticks with nothing to draw. Disabled means draw every tick.
    pub conditional_scheduling: bool,
    /// Draw every tick regardless of invalidation state.
    pub always_draw: bool,
    /// Color the frame (or each damaged region) is cleared to before painting.
    pub background: Rgba8Premul,
    /// Collapse to a full-frame redraw beyond this many disjoint regions.
    pub max_dirty_regions: usize,
    /// Collapse to a full-frame redraw beyond this viewport coverage fraction.
    pub full_frame_coverage_threshold: f64,
    /// Thresholds for the default cache policy.
    pub cache_policy: CachePolicyOpts,
}

impl Default for CompositorOpts {
    fn default() -> Self {
        let dirty = DirtyRegionOpts::default();
        Self {
            enable_caching: true,
            enable_dirty_region_drawing: true,
            conditional_scheduling: true,
            always_draw: false,
            background: Rgba8Premul::opaque(255, 255, 255),
            max_dirty_regions: dirty.max_regions,
            full_frame_coverage_threshold: dirty.full_frame_coverage_threshold,
            cache_policy: CachePolicyOpts::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

impl CompositorOpts {
    /// Parse options from JSON and validate them.
    pub fn from_json_str(s: &str) -> OverpaintResult<Self> {
        let opts: Self = serde_json::from_str(s)
            .map_err(|e| OverpaintError::validation(format!("invalid compositor options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Apply the compatibility toggles from the environment:
    /// `OVERPAINT_ALWAYS_DRAW`, `OVERPAINT_DISABLE_CONDITIONAL_DRAW`,
    /// `OVERPAINT_DISABLE_RENDER_CACHE`, `OVERPAINT_DISABLE_DIRTY_REGIONS`.
    ///
    /// Unset or unparsable variables leave the option untouched.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_flag("OVERPAINT_ALWAYS_DRAW") {
            self.always_draw = v;
        }
        if let Some(v) = env_flag("OVERPAINT_DISABLE_CONDITIONAL_DRAW") {
            self.conditional_scheduling = !v;
        }
        if let Some(v) = env_flag("OVERPAINT_DISABLE_RENDER_CACHE") {
            self.enable_caching = !v;
        }
        if let Some(v) = env_flag("OVERPAINT_DISABLE_DIRTY_REGIONS") {
            self.enable_dirty_region_drawing = !v;
        }
        self
    }

    /// Check option ranges.
    pub fn validate(&self) -> OverpaintResult<()> {
        if self.max_dirty_regions == 0 {
            return Err(OverpaintError::validation("max_dirty_regions must be > 0"));
        }
        let t = self.full_frame_coverage_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return Err(OverpaintError::validation(
                "full_frame_coverage_threshold must be within [0, 1]",
            ));
        }
        if self.cache_policy.max_texture_dimension == 0 {
            return Err(OverpaintError::validation(
                "cache_policy.max_texture_dimension must be > 0",
            ));
        }
        Ok(())
    }

    /// Tracker tuning derived from these options.
    pub fn dirty_region_opts(&self) -> DirtyRegionOpts {
        DirtyRegionOpts {
            max_regions: self.max_dirty_regions,
            full_frame_coverage_threshold: self.full_frame_coverage_threshold,
        }
    }

    /// Builder: toggle render caching.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    /// Builder: toggle dirty-region drawing.
    pub fn with_dirty_region_drawing(mut self, enabled: bool) -> Self {
        self.enable_dirty_region_drawing = enabled;
        self
    }

    /// Builder: toggle conditional scheduling.
    pub fn with_conditional_scheduling(mut self, enabled: bool) -> Self {
        self.conditional_scheduling = enabled;
        self
    }

    /// Builder: draw every tick.
    pub fn with_always_draw(mut self, enabled: bool) -> Self {
        self.always_draw = enabled;
        self
    }

    /// Builder: background color.
    pub fn with_background(mut self, background: Rgba8Premul) -> Self {
        self.background = background;
        self
    }

    /// Builder: region fragmentation limit.
    pub fn with_max_dirty_regions(mut self, max: usize) -> Self {
        self.max_dirty_regions = max;
        self
    }

    /// Builder: coverage threshold for full-frame fallback.
    pub fn with_full_frame_coverage_threshold(mut self, threshold: f64) -> Self {
        self.full_frame_coverage_threshold = threshold;
        self
    }

    /// Builder: cache policy thresholds.
    pub fn with_cache_policy(mut self, cache_policy: CachePolicyOpts) -> Self {
        self.cache_policy = cache_policy;
        self
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/opts.rs"]
mod tests;
