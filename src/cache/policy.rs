use crate::foundation::core::{Rect, non_empty, snap_outward};
use crate::retained::list::{RenderNode, RenderStateStep};

/// Snapshot of everything a [`CachePolicy`] may look at for one node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheContext {
    /// The node is effectively visible.
    pub is_visible: bool,
    /// The node is the scene root.
    pub is_root: bool,
    /// Subtree bounds in root space.
    pub bounds: Option<Rect>,
    /// A transform (own or inherited) applies.
    pub has_transform: bool,
    /// A clip (own or inherited) applies.
    pub has_clip: bool,
    /// Total render-state steps.
    pub render_state_step_count: usize,
    /// Nodes in the subtree.
    pub subtree_visual_count: usize,
    /// Sum of paint costs in the subtree.
    pub subtree_cost: u64,
    /// Some node in the subtree has no bounds.
    pub subtree_has_unbounded: bool,
    /// Current subtree render stamp.
    pub render_version: u64,
    /// Current subtree layout stamp.
    pub layout_version: u64,
    /// Current render-state signature.
    pub render_state_signature: u64,
    /// Device limit for offscreen surfaces.
    pub max_texture_dimension: u32,
    /// Drawn frames the stamps above have been observed unchanged. Filled in by the cache store;
    /// 0 when built with [`CacheContext::for_node`].
    pub stable_frames: u32,
}

impl CacheContext {
    /// Context for `node` on a device limited to `max_texture_dimension`.
    pub fn for_node(node: &RenderNode, max_texture_dimension: u32) -> Self {
        Self {
            is_visible: node.is_effectively_visible,
            is_root: node.parent_index.is_none(),
            bounds: node.subtree_bounds,
            has_transform: node.has_transform(),
            has_clip: node
                .render_state_steps
                .iter()
                .any(|s| matches!(s, RenderStateStep::Clip(_))),
            render_state_step_count: node.render_state_steps.len(),
            subtree_visual_count: node.subtree_visual_count,
            subtree_cost: node.subtree_cost,
            subtree_has_unbounded: node.subtree_has_unbounded,
            render_version: node.subtree_render_version,
            layout_version: node.subtree_layout_version,
            render_state_signature: node.render_state_signature,
            max_texture_dimension,
            stable_frames: 0,
        }
    }

    /// The stamps that decide whether a cached bitmap is stale.
    pub(crate) fn stamps(&self) -> (u64, u64, u64) {
        (
            self.render_version,
            self.layout_version,
            self.render_state_signature,
        )
    }
}

/// Stamps recorded on a cache entry when it was last painted.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct CacheStamp {
    /// Root-space rectangle the cached surface represents.
    pub bounds: Rect,
    /// Subtree render stamp at paint time.
    pub render_version: u64,
    /// Subtree layout stamp at paint time.
    pub layout_version: u64,
    /// Render-state signature at paint time.
    pub render_state_signature: u64,
}

impl CacheStamp {
    /// Stamp describing the current state of `ctx` rasterized into `bounds`.
    pub fn current(ctx: &CacheContext, bounds: Rect) -> Self {
        Self {
            bounds,
            render_version: ctx.render_version,
            layout_version: ctx.layout_version,
            render_state_signature: ctx.render_state_signature,
        }
    }
}

/// Decides which subtrees get an offscreen render cache.
pub trait CachePolicy {
    /// Whether caching `node` is worthwhile at all.
    fn can_cache(&self, node: &RenderNode, ctx: &CacheContext) -> bool;

    /// Root-space rectangle to rasterize, or `None` to refuse.
    fn cache_bounds(&self, node: &RenderNode, ctx: &CacheContext) -> Option<Rect> {
        let _ = node;
        snapped_cache_bounds(ctx, ctx.max_texture_dimension)
    }

    /// Whether `existing` no longer matches the subtree.
    fn should_rebuild(&self, node: &RenderNode, ctx: &CacheContext, existing: &CacheStamp) -> bool {
        let _ = node;
        existing.render_version != ctx.render_version
            || existing.layout_version != ctx.layout_version
            || existing.render_state_signature != ctx.render_state_signature
    }
}

/// Subtree bounds snapped outward to whole pixels; refused when empty or larger than `max_dim`.
pub fn snapped_cache_bounds(ctx: &CacheContext, max_dim: u32) -> Option<Rect> {
    let r = snap_outward(non_empty(ctx.bounds?)?);
    let max = f64::from(max_dim.min(ctx.max_texture_dimension));
    (r.width() <= max && r.height() <= max).then_some(r)
}

/// Thresholds for [`DefaultCachePolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CachePolicyOpts {
    /// Smallest subtree (in nodes) worth caching.
    pub min_subtree_visuals: usize,
    /// Smallest summed paint cost worth caching.
    pub min_subtree_cost: u64,
    /// Largest offscreen side, further limited by the device.
    pub max_texture_dimension: u32,
    /// Drawn frames a subtree must stay unchanged before it is cached; 0 caches immediately.
    pub min_stable_frames: u32,
}

impl Default for CachePolicyOpts {
    fn default() -> Self {
        Self {
            min_subtree_visuals: 3,
            min_subtree_cost: 3,
            max_texture_dimension: 4096,
            min_stable_frames: 1,
        }
    }
}

/// Caches fully bounded subtrees above a size and cost threshold once they have stopped changing.
///
/// The root is never cached; its stamps change with every edit anywhere in the scene. A subtree
/// edited on every frame keeps painting live instead of being rebuilt each time.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCachePolicy {
    opts: CachePolicyOpts,
}

impl DefaultCachePolicy {
    /// Policy with the given thresholds.
    pub fn new(opts: CachePolicyOpts) -> Self {
        Self { opts }
    }

    /// Thresholds in effect.
    pub fn opts(&self) -> CachePolicyOpts {
        self.opts
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn can_cache(&self, _node: &RenderNode, ctx: &CacheContext) -> bool {
        ctx.is_visible
            && !ctx.is_root
            && ctx.bounds.is_some()
            && !ctx.subtree_has_unbounded
            && ctx.subtree_visual_count >= self.opts.min_subtree_visuals
            && ctx.subtree_cost >= self.opts.min_subtree_cost
            && ctx.stable_frames >= self.opts.min_stable_frames
    }

    fn cache_bounds(&self, _node: &RenderNode, ctx: &CacheContext) -> Option<Rect> {
        snapped_cache_bounds(ctx, self.opts.max_texture_dimension)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/policy.rs"]
mod tests;
