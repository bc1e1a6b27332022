use std::time::Instant;

use crate::cache::policy::{CachePolicy, DefaultCachePolicy};
use crate::cache::store::{CacheOutcome, RenderCacheStore};
use crate::compose::metrics::{CompositorMetrics, DrawStrategy, FrameStats};
use crate::compose::opts::CompositorOpts;
use crate::damage::tracker::{DirtyRegionTracker, FullFrameReason};
use crate::foundation::core::{Rect, Viewport, non_empty, rects_overlap, snap_outward};
use crate::foundation::error::OverpaintResult;
use crate::render::scope::{BatchScope, StateScope, paint_node};
use crate::render::surface::{BatchState, RenderTarget};
use crate::retained::list::{
    RenderList, SubtreeExtent, SyncOutcome, is_effectively_visible, live_subtree_extent,
};
use crate::schedule::scheduler::{FrameInputs, FrameScheduler};
use crate::scene::events::{Invalidation, InvalidationKind, SceneEvent, StructureChange};
use crate::scene::visual::VisualTree;

#[derive(Default)]
struct WalkStats {
    visited: u64,
    painted: u64,
    culled: u64,
    from_cache: u64,
    fallbacks: u64,
}

/// Retained-mode compositor: turns scene events into damage, decides when to draw, and paints
/// the scene into a [`RenderTarget`] using render caches where the policy allows.
///
/// A frame driver calls [`Compositor::should_draw`] once per tick and [`Compositor::draw`] when
/// it returns `true`. Scene mutations are reported through [`Compositor::handle_event`] before
/// the tick in which they should become visible.
pub struct Compositor<S, P = DefaultCachePolicy> {
    opts: CompositorOpts,
    policy: P,
    dirty: DirtyRegionTracker,
    list: RenderList,
    cache: RenderCacheStore<S>,
    scheduler: FrameScheduler,
    metrics: CompositorMetrics,
}

impl<S: RenderTarget> Compositor<S> {
    /// Compositor using [`DefaultCachePolicy`] configured from `opts.cache_policy`.
    pub fn new(opts: CompositorOpts, viewport: Viewport) -> OverpaintResult<Self> {
        let policy = DefaultCachePolicy::new(opts.cache_policy);
        Self::with_policy(opts, viewport, policy)
    }
}

impl<S: RenderTarget, P: CachePolicy> Compositor<S, P> {
    /// Compositor with a custom cache policy.
    pub fn with_policy(opts: CompositorOpts, viewport: Viewport, policy: P) -> OverpaintResult<Self> {
        opts.validate()?;
        let mut dirty = DirtyRegionTracker::new(viewport, opts.dirty_region_opts());
        // Nothing has been presented yet.
        dirty.mark_full_frame_dirty(FullFrameReason::ViewportResized);
        Ok(Self {
            policy,
            dirty,
            list: RenderList::new(),
            cache: RenderCacheStore::new(),
            scheduler: FrameScheduler::new(opts.conditional_scheduling, opts.always_draw),
            metrics: CompositorMetrics::default(),
            opts,
        })
    }

    /// Options in effect.
    pub fn opts(&self) -> &CompositorOpts {
        &self.opts
    }

    /// Replace the options. Disabling caching drops every cache entry.
    pub fn set_opts(&mut self, opts: CompositorOpts) -> OverpaintResult<()> {
        opts.validate()?;
        self.dirty.set_opts(opts.dirty_region_opts());
        self.scheduler
            .set_toggles(opts.conditional_scheduling, opts.always_draw);
        if !opts.enable_caching {
            self.cache.clear();
        }
        if opts.background != self.opts.background {
            self.dirty.mark_full_frame_dirty(FullFrameReason::Requested);
        }
        self.opts = opts;
        Ok(())
    }

    /// Cache policy in use.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Damage accumulated since the last successful draw.
    pub fn dirty(&self) -> &DirtyRegionTracker {
        &self.dirty
    }

    /// Render list as of the last draw.
    pub fn render_list(&self) -> &RenderList {
        &self.list
    }

    /// Render caches.
    pub fn cache(&self) -> &RenderCacheStore<S> {
        &self.cache
    }

    /// Frame scheduler state.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Snapshot of the cumulative counters.
    pub fn metrics(&self) -> CompositorMetrics {
        let mut m = self.metrics.clone();
        let sched = self.scheduler.counters();
        m.draw_executed_frames = sched.draw_executed_frames;
        m.draw_skipped_frames = sched.draw_skipped_frames;
        m.cache = self.cache.counters();
        m.list_rebuilds = self.list.rebuild_count();
        m
    }

    /// Feed a batch of scene events, in the order they were raised.
    pub fn handle_events<T: VisualTree + ?Sized>(
        &mut self,
        tree: &mut T,
        events: impl IntoIterator<Item = SceneEvent>,
    ) {
        for event in events {
            self.handle_event(tree, event);
        }
    }

    /// Feed one scene event.
    pub fn handle_event<T: VisualTree + ?Sized>(&mut self, tree: &mut T, event: SceneEvent) {
        match event {
            SceneEvent::Invalidated(inv) => self.handle_invalidation(tree, inv),
            SceneEvent::StructureChanged(change) => self.handle_structure_changed(change),
        }
    }

    /// Record damage and scheduling state for an invalidation.
    ///
    /// Old bounds come from the render list (what is on screen); new bounds are read from the
    /// tree, which already reflects the change.
    pub fn handle_invalidation<T: VisualTree + ?Sized>(&mut self, tree: &mut T, inv: Invalidation) {
        self.scheduler.note_invalidation(inv.kind);
        let Some(id) = inv.source else {
            self.dirty
                .mark_full_frame_dirty(FullFrameReason::Unattributed);
            // No stamp can be trusted without an originator.
            self.list.mark_structure_changed();
            self.cache.clear();
            return;
        };

        let hint = match inv.kind {
            InvalidationKind::Render => tree
                .visual_mut(id)
                .and_then(|v| v.take_dirty_bounds_hint()),
            _ => None,
        };
        let tree = &*tree;
        let listed = self.list.index_of(id);
        let visible = is_effectively_visible(tree, id);

        match (listed, visible) {
            (None, false) => {}
            (Some(i), true) => {
                let node = &self.list.nodes()[i];
                if inv.kind.is_layout() {
                    let old = SubtreeExtent::of_node(node);
                    let new = live_subtree_extent(tree, id);
                    add_extent_damage(&mut self.dirty, old, new);
                } else if let Some(hint) = hint {
                    self.dirty.add_dirty_region(hint);
                } else {
                    let new = tree
                        .visual(id)
                        .and_then(|v| v.bounds_in_root())
                        .and_then(non_empty);
                    self.dirty.add_bounds_change(node.bounds, new);
                }
                self.list.note_invalidated(tree, id, inv.kind);
            }
            (Some(i), false) => {
                let old = SubtreeExtent::of_node(&self.list.nodes()[i]);
                add_extent_damage(&mut self.dirty, old, SubtreeExtent::default());
                self.list.note_structure_changed(tree.parent(id), None);
            }
            (None, true) => {
                let new = live_subtree_extent(tree, id);
                add_extent_damage(&mut self.dirty, SubtreeExtent::default(), new);
                self.list.note_structure_changed(tree.parent(id), None);
            }
        }
    }

    /// Record a structural change: the list is rebuilt and the whole frame repainted.
    pub fn handle_structure_changed(&mut self, change: StructureChange) {
        tracing::trace!(element = change.element.0, "structure changed");
        self.list
            .note_structure_changed(change.old_parent, change.new_parent);
        self.dirty
            .mark_full_frame_dirty(FullFrameReason::StructureChanged);
        self.scheduler.note_structure_changed();
    }

    /// Repaint everything on the next draw.
    pub fn request_full_redraw(&mut self) {
        self.dirty.mark_full_frame_dirty(FullFrameReason::Requested);
        self.scheduler.request_redraw();
    }

    /// Decide whether this tick needs a draw. Call once per tick.
    pub fn should_draw(&mut self, inputs: &FrameInputs) -> bool {
        let current = self.dirty.viewport();
        if inputs.viewport.device_generation != current.device_generation {
            let evicted = self.cache.clear();
            tracing::debug!(
                from = current.device_generation,
                to = inputs.viewport.device_generation,
                evicted,
                "render device changed; caches dropped"
            );
        }
        self.dirty.set_viewport(inputs.viewport);
        self.scheduler
            .evaluate(inputs, self.dirty.is_dirty())
            .draw
    }

    /// Paint a frame into `target`.
    ///
    /// On error the batch and every pushed clip/transform are still unwound, and the damage and
    /// invalidation state are kept so the next frame repaints.
    #[tracing::instrument(level = "debug", skip_all, fields(frame = self.metrics.frames_drawn + 1))]
    pub fn draw<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        target: &mut S,
    ) -> OverpaintResult<FrameStats> {
        let started = Instant::now();
        self.cache.begin_frame();
        let (w, h) = target.size();
        let vp = self.dirty.viewport();
        if (w, h) != (vp.width, vp.height) {
            self.dirty.set_viewport(Viewport {
                width: w,
                height: h,
                ..vp
            });
        }

        let sync = self.list.synchronize(tree, &mut self.dirty);
        if matches!(sync, SyncOutcome::Rebuilt { .. }) {
            let list = &self.list;
            self.cache.retain(|id| list.contains(id));
        }
        if !self.opts.enable_caching && !self.cache.is_empty() {
            self.cache.clear();
        }

        let full_frame_reason = self.dirty.full_frame_reason();
        let dirty_coverage = self.dirty.dirty_area_coverage();
        let strategy = if self.opts.enable_caching
            && self.opts.enable_dirty_region_drawing
            && !self.dirty.is_full_frame_dirty()
            && self.dirty.region_count() > 0
        {
            DrawStrategy::DirtyRegions
        } else {
            DrawStrategy::FullFrame
        };
        let regions: Vec<Rect> = match strategy {
            DrawStrategy::DirtyRegions => self
                .dirty
                .regions()
                .iter()
                .map(|&r| snap_outward(r))
                .collect(),
            DrawStrategy::FullFrame => Vec::new(),
        };

        let mut walk = WalkStats::default();
        if let Err(e) = self.paint_pass(tree, target, &regions, &mut walk) {
            self.metrics.frames_failed += 1;
            if strategy == DrawStrategy::FullFrame {
                self.dirty.mark_full_frame_dirty(FullFrameReason::DrawFailed);
            }
            tracing::debug!(error = %e, "draw failed; damage kept for the next frame");
            return Err(e);
        }

        self.scheduler.on_draw_completed(self.dirty.viewport());
        self.dirty.clear();

        let stats = FrameStats {
            frame: self.metrics.frames_drawn + 1,
            reasons: self.scheduler.last_reasons(),
            strategy,
            full_frame_reason,
            sync,
            region_count: regions.len(),
            dirty_coverage,
            nodes_visited: walk.visited,
            nodes_painted: walk.painted,
            nodes_culled: walk.culled,
            nodes_from_cache: walk.from_cache,
            nodes_rasterized: self.cache.frame_nodes_rasterized(),
            cache: self.cache.frame_counters(),
            uninitialized_bounds_fallbacks: walk.fallbacks,
            elapsed_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        self.metrics.record_frame(&stats);
        tracing::debug!(
            ?strategy,
            regions = stats.region_count,
            painted = stats.nodes_painted,
            rasterized = stats.nodes_rasterized,
            hits = stats.cache.hits,
            "frame drawn"
        );
        Ok(stats)
    }

    fn paint_pass<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        target: &mut S,
        regions: &[Rect],
        walk: &mut WalkStats,
    ) -> OverpaintResult<()> {
        let background = self.opts.background;
        let mut batch = BatchScope::begin(target, BatchState::default());
        if regions.is_empty() {
            batch.surface().clear(background);
            return self.walk(tree, batch.surface(), None, walk);
        }
        for &region in regions {
            let mut clip = StateScope::new(batch.surface());
            clip.push_clip(region);
            clip.surface().clear(background);
            self.walk(tree, clip.surface(), Some(region), walk)?;
        }
        Ok(())
    }

    /// Visit the list in paint order, culling subtrees outside `region`.
    fn walk<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        surface: &mut S,
        region: Option<Rect>,
        stats: &mut WalkStats,
    ) -> OverpaintResult<()> {
        let len = self.list.len();
        let mut i = 0;
        while i < len {
            let node = &self.list.nodes()[i];
            let end = node.subtree_end;
            if let Some(region) = region
                && !node.subtree_has_unbounded
                && !node
                    .subtree_bounds
                    .is_some_and(|b| rects_overlap(b, region))
            {
                stats.culled += (end - i) as u64;
                i = end;
                continue;
            }
            stats.visited += 1;

            if self.opts.enable_caching {
                let outcome =
                    self.cache
                        .ensure_node_cache(&self.list, i, &self.policy, tree, &*surface)?;
                if outcome != CacheOutcome::Rejected
                    && self
                        .cache
                        .try_draw_cached(&self.list, i, &self.policy, surface)
                {
                    if outcome == CacheOutcome::Fresh {
                        self.cache.record_hit(node.visual);
                    }
                    stats.from_cache += (end - i - 1) as u64;
                    i = end;
                    continue;
                }
            }

            if node.bounds.is_none() {
                stats.fallbacks += 1;
            }
            if let Some(visual) = tree.visual(node.visual) {
                paint_node(node, visual, surface)?;
                stats.painted += 1;
            }
            i += 1;
        }
        Ok(())
    }
}

/// Damage for a subtree that moved, appeared, or disappeared. Unknown extents repaint everything.
fn add_extent_damage(dirty: &mut DirtyRegionTracker, old: SubtreeExtent, new: SubtreeExtent) {
    if old.has_unbounded || new.has_unbounded {
        dirty.mark_full_frame_dirty(FullFrameReason::UnknownBounds);
    } else {
        dirty.add_bounds_change(old.bounds, new.bounds);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/compositor.rs"]
mod tests;
