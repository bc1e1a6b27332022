use std::collections::{HashMap, HashSet};

use crate::cache::policy::{CacheContext, CachePolicy, CacheStamp};
use crate::foundation::core::{Affine, Rect, Rgba8Premul, VisualId};
use crate::foundation::error::OverpaintResult;
use crate::render::scope::{BatchScope, StateScope, paint_node};
use crate::render::surface::{BatchState, RenderTarget};
use crate::retained::list::{RenderList, RenderNode};
use crate::scene::visual::VisualTree;

/// Cache activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheCounters {
    /// Blits of an entry that was already up to date.
    pub hits: u64,
    /// Entries created for the first time.
    pub misses: u64,
    /// Existing entries repainted because their stamps or bounds changed.
    pub rebuilds: u64,
    /// Entries disposed.
    pub evictions: u64,
}

impl CacheCounters {
    fn add(&mut self, other: CacheCounters) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.rebuilds += other.rebuilds;
        self.evictions += other.evictions;
    }
}

/// What [`RenderCacheStore::ensure_node_cache`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The policy refused the node; any entry was evicted.
    Rejected,
    /// The existing entry is current.
    Fresh,
    /// A new entry was painted.
    Created,
    /// An existing entry was repainted.
    Rebuilt,
}

/// A cached subtree bitmap.
pub struct CacheEntry<S> {
    surface: S,
    stamp: CacheStamp,
}

impl<S> CacheEntry<S> {
    /// The offscreen surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Stamps recorded at paint time.
    pub fn stamp(&self) -> &CacheStamp {
        &self.stamp
    }

    /// Root-space rectangle the surface represents.
    pub fn bounds(&self) -> Rect {
        self.stamp.bounds
    }
}

/// Last stamps seen for a visual and how many frames they have held.
#[derive(Clone, Copy, Debug)]
struct Seen {
    stamps: (u64, u64, u64),
    stable_frames: u32,
    frame: u64,
}

/// Offscreen render caches keyed by visual identity.
///
/// Entries outlive render-list rebuilds; the compositor evicts entries whose visual left the tree.
/// Within one counting window each visual contributes at most one hit, miss, or rebuild, however
/// many dirty regions it is drawn into.
pub struct RenderCacheStore<S> {
    entries: HashMap<VisualId, CacheEntry<S>>,
    history: HashMap<VisualId, Seen>,
    frame_index: u64,
    total: CacheCounters,
    frame: CacheCounters,
    counted: HashSet<VisualId>,
    rasterized: u64,
}

impl<S> Default for RenderCacheStore<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            history: HashMap::new(),
            frame_index: 0,
            total: CacheCounters::default(),
            frame: CacheCounters::default(),
            counted: HashSet::new(),
            rasterized: 0,
        }
    }
}

impl<S> RenderCacheStore<S> {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the entry for `visual`.
    pub fn try_get(&self, visual: VisualId) -> Option<&CacheEntry<S>> {
        self.entries.get(&visual)
    }

    /// Install or replace an entry; a replaced surface is dropped.
    pub fn upsert(&mut self, visual: VisualId, surface: S, stamp: CacheStamp) {
        self.entries.insert(visual, CacheEntry { surface, stamp });
    }

    /// Dispose the entry for `visual`. Returns whether one existed.
    pub fn remove(&mut self, visual: VisualId) -> bool {
        let removed = self.entries.remove(&visual).is_some();
        if removed {
            self.count(|c| c.evictions += 1);
            tracing::trace!(visual = visual.0, "render cache evicted");
        }
        removed
    }

    /// Keep only entries whose visual satisfies `keep`. Returns the number evicted.
    pub fn retain(&mut self, mut keep: impl FnMut(VisualId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|&id, _| keep(id));
        self.history.retain(|&id, _| keep(id));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            self.count(|c| c.evictions += evicted as u64);
            tracing::debug!(evicted, "render caches evicted for departed visuals");
        }
        evicted
    }

    /// Dispose every entry.
    pub fn clear(&mut self) -> usize {
        self.retain(|_| false)
    }

    /// Counters since creation.
    pub fn counters(&self) -> CacheCounters {
        self.total
    }

    /// Counters since the last [`Self::begin_frame`].
    pub fn frame_counters(&self) -> CacheCounters {
        self.frame
    }

    /// Nodes painted into offscreen surfaces since the last [`Self::begin_frame`].
    pub fn frame_nodes_rasterized(&self) -> u64 {
        self.rasterized
    }

    /// Start a new per-frame counting window.
    pub fn begin_frame(&mut self) {
        self.frame_index += 1;
        self.frame = CacheCounters::default();
        self.counted.clear();
        self.rasterized = 0;
    }

    /// Count a blit of an up-to-date entry, unless `visual` already has an outcome this frame.
    pub(crate) fn record_hit(&mut self, visual: VisualId) {
        if self.counted.insert(visual) {
            self.count(|c| c.hits += 1);
        }
    }

    fn count(&mut self, f: impl Fn(&mut CacheCounters)) {
        let mut delta = CacheCounters::default();
        f(&mut delta);
        self.frame.add(delta);
        self.total.add(delta);
    }

    /// Record the stamps of `visual` for this frame and return how many frames they have held.
    fn observe(&mut self, visual: VisualId, ctx: &CacheContext) -> u32 {
        let stamps = ctx.stamps();
        let frame = self.frame_index;
        let seen = self.history.entry(visual).or_insert(Seen {
            stamps,
            stable_frames: 0,
            frame,
        });
        if seen.stamps != stamps {
            *seen = Seen {
                stamps,
                stable_frames: 0,
                frame,
            };
        } else if seen.frame != frame {
            seen.stable_frames = seen.stable_frames.saturating_add(1);
            seen.frame = frame;
        }
        seen.stable_frames
    }

    /// Policy context for `node`, with the stability already observed this frame.
    fn context(&self, node: &RenderNode, max_texture_dimension: u32) -> CacheContext {
        let mut ctx = CacheContext::for_node(node, max_texture_dimension);
        ctx.stable_frames = self
            .history
            .get(&node.visual)
            .filter(|seen| seen.stamps == ctx.stamps())
            .map_or(0, |seen| seen.stable_frames);
        ctx
    }
}

impl<S: RenderTarget> RenderCacheStore<S> {
    /// Make sure the cache for the node at `index` is current, painting it if needed.
    pub fn ensure_node_cache<T, P>(
        &mut self,
        list: &RenderList,
        index: usize,
        policy: &P,
        tree: &T,
        target: &S,
    ) -> OverpaintResult<CacheOutcome>
    where
        T: VisualTree + ?Sized,
        P: CachePolicy + ?Sized,
    {
        let node = &list.nodes()[index];
        let mut ctx = CacheContext::for_node(node, target.max_texture_dimension());
        ctx.stable_frames = self.observe(node.visual, &ctx);
        let bounds = if policy.can_cache(node, &ctx) {
            policy.cache_bounds(node, &ctx)
        } else {
            None
        };
        let Some(bounds) = bounds else {
            self.remove(node.visual);
            return Ok(CacheOutcome::Rejected);
        };

        if let Some(entry) = self.entries.get(&node.visual)
            && entry.stamp.bounds == bounds
            && !policy.should_rebuild(node, &ctx, &entry.stamp)
        {
            return Ok(CacheOutcome::Fresh);
        }

        let w = bounds.width() as u32;
        let h = bounds.height() as u32;
        let (mut surface, outcome) = match self.entries.remove(&node.visual) {
            Some(entry) if entry.surface.size() == (w, h) => {
                (entry.surface, CacheOutcome::Rebuilt)
            }
            Some(_) => (target.create_offscreen(w, h)?, CacheOutcome::Rebuilt),
            None => (target.create_offscreen(w, h)?, CacheOutcome::Created),
        };

        let painted = rasterize_subtree(list, index, tree, &mut surface, bounds)?;
        self.rasterized += painted;
        if self.counted.insert(node.visual) {
            match outcome {
                CacheOutcome::Created => self.count(|c| c.misses += 1),
                _ => self.count(|c| c.rebuilds += 1),
            }
        }
        tracing::trace!(visual = node.visual.0, ?outcome, w, h, painted, "render cache painted");
        self.upsert(node.visual, surface, CacheStamp::current(&ctx, bounds));
        Ok(outcome)
    }

    /// Blit the cache of the node at `index` if it is still usable. On `true` the caller skips
    /// the node's whole subtree.
    pub fn try_draw_cached<P>(
        &self,
        list: &RenderList,
        index: usize,
        policy: &P,
        target: &mut S,
    ) -> bool
    where
        P: CachePolicy + ?Sized,
    {
        let node = &list.nodes()[index];
        let Some(entry) = self.entries.get(&node.visual) else {
            return false;
        };
        let ctx = self.context(node, target.max_texture_dimension());
        if !policy.can_cache(node, &ctx) {
            return false;
        }
        if policy.cache_bounds(node, &ctx) != Some(entry.bounds()) {
            return false;
        }

        let mut scope = StateScope::new(target);
        scope.apply_all(node.ancestor_steps());
        scope.surface().blit(&entry.surface, entry.bounds().origin());
        true
    }
}

/// Paint the subtree at `index` into `surface`, with `bounds.origin()` mapped to the surface
/// origin. Returns the number of nodes painted.
fn rasterize_subtree<S, T>(
    list: &RenderList,
    index: usize,
    tree: &T,
    surface: &mut S,
    bounds: Rect,
) -> OverpaintResult<u64>
where
    S: RenderTarget,
    T: VisualTree + ?Sized,
{
    let nodes = list.nodes();
    let end = nodes[index].subtree_end;

    let mut batch = BatchScope::begin(surface, BatchState::default());
    batch.surface().clear(Rgba8Premul::TRANSPARENT);
    let mut scope = StateScope::new(batch.surface());
    scope.push_transform(Affine::translate(-bounds.origin().to_vec2()));
    let mut painted = 0;
    for node in &nodes[index..end] {
        let Some(visual) = tree.visual(node.visual) else {
            continue;
        };
        paint_node(node, visual, scope.surface())?;
        painted += 1;
    }
    Ok(painted)
}

#[cfg(test)]
#[path = "../../tests/unit/cache/store.rs"]
mod tests;
